//! Participant process. Exit status reports the outcome:
//! 0 won, 1 eliminated, 2 lost the arbiter, 130 cancelled, 3 failed.

use std::sync::Arc;

use anyhow::Result;

use shootout::bus;
use shootout::config::ShooterConfig;
use shootout::logging::{error, obj, v_str, Domain};
use shootout::retry::{retry_async, RetryPolicy};
use shootout::shooter::{self, Outcome};
use shootout::shutdown::Shutdown;

const EXIT_FAILED: i32 = 3;

async fn run() -> Result<Outcome> {
    let cfg = ShooterConfig::from_env();
    cfg.validate()?;

    let bus_addr = cfg.bus_addr.clone();
    let bus = retry_async(&RetryPolicy::from_env(), "bus_connect", || bus::connect(&bus_addr)).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();
    shooter::run(cfg, Arc::new(bus), shutdown).await
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            error(Domain::Shooter, "shooter_failed", obj(&[("error", v_str(&format!("{:#}", err)))]));
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}
