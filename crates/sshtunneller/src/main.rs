use std::process::ExitCode;

use sshtunneller::{LoggingConfig, ProcessEnv, Tunneller};

#[tokio::main]
async fn main() -> ExitCode {
    let env = ProcessEnv;
    let logging = LoggingConfig::from_env(&env);

    Tunneller::new(logging).run(&env).await.into()
}
