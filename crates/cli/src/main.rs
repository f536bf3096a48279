use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

mod client;
mod index;
mod mc;

use client::{default_config_path, load_config, save_config, ApiClient, CliConfig};

#[derive(Parser)]
#[command(name = "wio", author, version, about = "Workspace broker client")]
#[command(arg_required_else_help(true))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Broker API url, e.g. http://localhost:8100/api
    #[arg(long, env = "WIO_ENDPOINT_URL", global = true)]
    api_url: Option<String>,

    #[arg(long, env = "WIO_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Login and identity
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Storage node administration
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },
    /// Workspace root administration
    Root {
        #[command(subcommand)]
        command: RootCommand,
    },
    /// Workspace management
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommand,
    },
    /// Scoped credential management
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    /// Full-text search over indexed workspaces
    Search { query: String },
    /// Run `mc` with workspace arguments rewritten to object paths
    Mc {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Store api-key credentials for future calls
    Login {
        #[arg(long)]
        key_id: String,
        #[arg(long)]
        secret: String,
    },
    /// Show the authenticated user
    Info,
}

#[derive(Subcommand)]
enum NodeCommand {
    Create {
        name: String,
        api_url: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[arg(long)]
        sts_api_url: Option<String>,
        #[arg(long)]
        access_key_id: String,
        #[arg(long)]
        secret_access_key: String,
        #[arg(long)]
        assume_role_arn: Option<String>,
    },
    List,
    Delete {
        node_id: String,
    },
}

#[derive(Subcommand)]
enum RootCommand {
    Create {
        bucket: String,
        #[arg(long)]
        node_name: String,
        #[arg(long, default_value = "private")]
        root_type: String,
        #[arg(long, default_value = "")]
        base_path: String,
    },
    List {
        #[arg(long)]
        node_name: Option<String>,
    },
    Delete {
        root_id: String,
        #[arg(long)]
        cascade: bool,
    },
    /// List a root's immediate children to register unmanaged workspaces
    Import {
        root_id: String,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommand {
    Create {
        name: String,
        #[arg(long)]
        public: bool,
        #[arg(long)]
        unmanaged: bool,
        #[arg(long)]
        base_path: Option<String>,
        #[arg(long)]
        node_name: Option<String>,
        #[arg(long)]
        root_id: Option<String>,
    },
    List {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        like: Option<String>,
        #[arg(long)]
        public: bool,
    },
    Share {
        workspace: String,
        sharee: String,
        #[arg(long, default_value = "read")]
        permission: String,
        #[arg(long)]
        expiration: Option<String>,
    },
    Delete {
        workspace_id: String,
    },
    /// Crawl a workspace into the search index (node operators only)
    Index {
        term: String,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Mint or reuse credentials for the given search terms
    Fetch {
        workspaces: Vec<String>,
    },
    List,
    Delete {
        token_id: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

fn output(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

async fn dispatch(cli: Cli, client: &ApiClient, config_path: &PathBuf, config: CliConfig) -> Result<Value> {
    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::Login { key_id, secret } => {
                let updated = CliConfig {
                    access_key: Some(key_id),
                    secret_key: Some(secret),
                    api_url: config.api_url,
                };
                // Validate before persisting.
                let me: Value = ApiClient::new(updated.clone()).get("users/me").await?;
                save_config(config_path, &updated)?;
                Ok(me)
            }
            AuthCommand::Info => client.get("users/me").await,
        },
        Command::Node { command } => match command {
            NodeCommand::Create {
                name,
                api_url,
                region,
                sts_api_url,
                access_key_id,
                secret_access_key,
                assume_role_arn,
            } => {
                client
                    .post(
                        "node",
                        &serde_json::json!({
                            "name": name,
                            "api_url": api_url,
                            "region": region,
                            "sts_api_url": sts_api_url,
                            "access_key_id": access_key_id,
                            "secret_access_key": secret_access_key,
                            "assume_role_arn": assume_role_arn,
                        }),
                    )
                    .await
            }
            NodeCommand::List => client.get("node").await,
            NodeCommand::Delete { node_id } => client.delete(&format!("node/{node_id}")).await,
        },
        Command::Root { command } => match command {
            RootCommand::Create {
                bucket,
                node_name,
                root_type,
                base_path,
            } => {
                client
                    .post(
                        "root",
                        &serde_json::json!({
                            "bucket": bucket,
                            "node_name": node_name,
                            "root_type": root_type,
                            "base_path": base_path,
                        }),
                    )
                    .await
            }
            RootCommand::List { node_name } => {
                let query: Vec<(&str, String)> = node_name
                    .map(|name| vec![("node_name", name)])
                    .unwrap_or_default();
                client.get_with_query("root", &query).await
            }
            RootCommand::Delete { root_id, cascade } => {
                client
                    .delete(&format!("root/{root_id}?cascade={cascade}"))
                    .await
            }
            RootCommand::Import { root_id } => {
                client
                    .post(&format!("root/{root_id}/import"), &serde_json::json!({}))
                    .await
            }
        },
        Command::Workspace { command } => match command {
            WorkspaceCommand::Create {
                name,
                public,
                unmanaged,
                base_path,
                node_name,
                root_id,
            } => {
                client
                    .post(
                        "workspace",
                        &serde_json::json!({
                            "name": name,
                            "public": public,
                            "unmanaged": unmanaged,
                            "base_path": base_path,
                            "node_name": node_name,
                            "root_id": root_id,
                        }),
                    )
                    .await
            }
            WorkspaceCommand::List { name, like, public } => {
                let mut query: Vec<(&str, String)> = vec![("public", public.to_string())];
                if let Some(name) = name {
                    query.push(("name", name));
                }
                if let Some(like) = like {
                    query.push(("like", like));
                }
                client.get_with_query("workspace", &query).await
            }
            WorkspaceCommand::Share {
                workspace,
                sharee,
                permission,
                expiration,
            } => {
                client
                    .post(
                        "workspace/share",
                        &serde_json::json!({
                            "workspace": workspace,
                            "sharee": sharee,
                            "permission": permission,
                            "expiration": expiration,
                        }),
                    )
                    .await
            }
            WorkspaceCommand::Delete { workspace_id } => {
                client.delete(&format!("workspace/{workspace_id}")).await
            }
            WorkspaceCommand::Index { term } => index::crawl_workspace(client, &term).await,
        },
        Command::Token { command } => match command {
            TokenCommand::Fetch { workspaces } => {
                client
                    .post(
                        "token/search",
                        &serde_json::json!({ "search_terms": workspaces }),
                    )
                    .await
            }
            TokenCommand::List => client.get("token").await,
            TokenCommand::Delete { token_id, all } => {
                if all {
                    client.delete("token").await
                } else {
                    let token_id = token_id
                        .ok_or_else(|| anyhow::anyhow!("token_id or --all is required"))?;
                    client.delete(&format!("token/{token_id}")).await
                }
            }
        },
        Command::Search { query } => {
            client
                .get_with_query("search", &[("q", query)])
                .await
        }
        Command::Mc { .. } => unreachable!("handled in main"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    if let Some(ref api_url) = cli.api_url {
        config.api_url = api_url.clone();
    }
    let client = ApiClient::new(config.clone());

    // mc execs the real client and forwards its exit code.
    if let Command::Mc { ref args } = cli.command {
        match mc::run(&client, args.clone()).await {
            Ok(code) => std::process::exit(code),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }

    match dispatch(cli, &client, &config_path, config).await {
        Ok(value) => {
            output(&value);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
