// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use relayrpc::auth::SignatureAuth;
use relayrpc::request::{echo_service_with_hooks, ServiceHooks, ECHO_SERVICE};
use relayrpc::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Client, NodeRuntime,
    RedisNodeManager, RequestProcessor, RpcConfig,
};
use serde_json::Value;
use tokio::runtime::{self, Runtime};
use tracing::{info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// directory of the rolling log files written by `serve`
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// host the built-in Echo service and keep it registered
    Serve,
    /// call one action, e.g. `Echo.Core.ping`
    Call {
        path: String,
        /// JSON argument; an array is spread into positional arguments
        #[arg(long)]
        arg: Option<String>,
        #[arg(long)]
        version: Option<i32>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    match commandline.verbose {
        0 => {}
        1 => std::env::set_var("RUST_LOG", "info"),
        2 => std::env::set_var("RUST_LOG", "debug"),
        _ => std::env::set_var("RUST_LOG", "trace"),
    }

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = RpcConfig::set_up_config(config_path)?;

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

    match commandline.command.unwrap_or(Command::Serve) {
        Command::PrintConfig => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Call {
            path,
            arg,
            version,
            timeout_ms,
        } => {
            setup_local_tracing()?;
            rt.block_on(call(&config, &path, arg.as_deref(), version, timeout_ms))
        }
        Command::Serve => {
            let _otel_guard = rt.block_on(setup_tracing(&commandline.log_dir))?;
            serve(config, &rt)
        }
    }
}

fn serve(config: RpcConfig, rt: &Runtime) -> AppResult<()> {
    if config.node.service != ECHO_SERVICE {
        warn!(
            "node advertises service {} but only hosts {}",
            config.node.service, ECHO_SERVICE
        );
    }
    let registry = Arc::new(RedisNodeManager::from_config(&config.registry)?);

    let hooks: Option<Arc<dyn ServiceHooks>> = if config.auth.enabled {
        info!("signature check enabled for {} appid(s)", config.auth.secrets.len());
        Some(Arc::new(SignatureAuth::from_config(&config.auth)))
    } else {
        None
    };
    let mut processor = RequestProcessor::new(config.node.debug);
    processor.register(echo_service_with_hooks(hooks)?)?;

    NodeRuntime::new(config, registry, processor).start(rt)
}

async fn call(
    config: &RpcConfig,
    path: &str,
    arg: Option<&str>,
    version: Option<i32>,
    timeout_ms: Option<u64>,
) -> AppResult<()> {
    let registry = Arc::new(RedisNodeManager::from_config(&config.registry)?);
    let mut client = Client::from_config(registry, &config.client);

    let arg: Value = match arg {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Null,
    };
    client.add_request(path, version)?.set_arg(arg);

    let timeout = timeout_ms.map_or_else(|| client.timeout(), Duration::from_millis);
    if client.exec(timeout).await > 0 {
        return Err(AppError::Timeout(format!(
            "{} did not answer within {:?}",
            path, timeout
        )));
    }
    client.report_failures().await;

    let response = client
        .last_batch()
        .first()
        .and_then(|context| context.response())
        .ok_or_else(|| AppError::IllegalStateError("call finished without a response".into()))?;
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
