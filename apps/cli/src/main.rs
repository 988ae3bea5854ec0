use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use pitchdesk_core_sdk::client::{ChatClient, ChatSession};
use pitchdesk_core_sdk::config::AppConfig;
use pitchdesk_core_sdk::model::select_model;
use pitchdesk_core_sdk::notice::classify;
use pitchdesk_core_sdk::render::{render, Bubble};
use pitchdesk_core_sdk::store::{ChatStore, StoreEvent};
use pitchdesk_core_sdk::{server, telemetry};

/**
 * \brief CLI 程序入口：启动站点服务，或在终端里使用聊天组件。
 */
#[derive(Parser, Debug)]
#[command(name = "pitchdesk", version, about = "Pitchdesk site server and chat widget")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP 服务，提供 /api/chat 与站点静态文件。
     */
    Serve {
        /** \brief 监听地址，缺省读取 PITCHDESK_ADDR */
        #[arg(long)]
        addr: Option<String>,
        /** \brief 站点目录，缺省读取 PITCHDESK_SITE_DIR */
        #[arg(long)]
        site_dir: Option<String>,
    },

    /**
     * \brief 检查当前凭证会选中哪个模型服务，不访问网络。
     */
    Check,

    /**
     * \brief 连接正在运行的服务进行对话；给出 --prompt 时只发送一次。
     */
    Chat {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    telemetry::set_enabled(config.telemetry_enabled);

    match cli.command {
        Commands::Serve { addr, site_dir } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(dir) = site_dir {
                config.site_dir = dir;
            }
            server::run(config).await?;
        }
        Commands::Check => match select_model(&config.credentials, &config.endpoints) {
            Ok(handle) => println!(
                "provider={} model={} base={}",
                handle.provider.name(),
                handle.model,
                handle.api_base
            ),
            Err(e) => return Err(e).context("no usable model credentials"),
        },
        Commands::Chat { url, prompt } => {
            let client = ChatClient::new(&url).context("create chat client failed")?;
            let mut session = ChatSession::new(client, watched_store());
            match prompt {
                Some(prompt) => {
                    session.send(&prompt).await;
                    println!();
                }
                None => repl(&mut session).await?,
            }
        }
    }

    Ok(())
}

/**
 * \brief 订阅状态变化：增量输出回复，错误转为提示。
 */
fn watched_store() -> ChatStore {
    let mut store = ChatStore::new();
    store.subscribe(Box::new(|event: &StoreEvent| match event {
        StoreEvent::TextAppended { delta, .. } => {
            print!("{}", delta);
            std::io::stdout().flush().ok();
        }
        StoreEvent::GeneratingChanged(true) => {
            eprintln!("💭 Model is thinking...");
        }
        StoreEvent::ErrorRaised(message) => {
            let notice = classify(message);
            eprintln!("\n[!] {}: {}", notice.title, notice.description);
        }
        _ => {}
    }));
    store
}

async fn repl(session: &mut ChatSession) -> Result<()> {
    eprintln!("Commands: /edit <text>  /retry  /show  /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin failed")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/show", _) => print_transcript(session.store()),
            ("/retry", _) => {
                if !session.regenerate().await {
                    eprintln!("nothing to regenerate");
                }
                println!();
            }
            ("/edit", text) => {
                let Some(id) = session.store().last_user_message_id().map(str::to_string) else {
                    eprintln!("no user message to edit");
                    continue;
                };
                if text.trim().is_empty() {
                    eprintln!("usage: /edit <text>");
                    continue;
                }
                session.edit(&id, text.trim()).await;
                println!();
            }
            _ => {
                session.send(line).await;
                println!();
            }
        }
    }
    Ok(())
}

fn print_transcript(store: &ChatStore) {
    let view = render(store.messages(), store.is_generating());
    for message in &view.messages {
        for bubble in &message.bubbles {
            match bubble {
                Bubble::User { text, show_actions } => {
                    let marker = if *show_actions { " [editable]" } else { "" };
                    println!("you{}: {}", marker, text);
                }
                Bubble::Assistant { text } => println!("assistant: {}", text),
            }
        }
    }
    if view.thinking {
        println!("💭 Model is thinking...");
    }
}
