use crate::commands::{self, CommandResult, FailureKind};
use docflow_db::{connect_from_config, migrations};

pub fn run() -> CommandResult {
    let config = match commands::load_config("migrate") {
        Ok(config) => config,
        Err(result) => return *result,
    };
    let runtime = match commands::runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return *result,
    };

    let outcome = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| (FailureKind::Database, error.to_string()))?;
        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| (FailureKind::Migration, error.to_string()))?;
        pool.close().await;
        Ok::<usize, (FailureKind, String)>(applied)
    });

    match outcome {
        Ok(applied) => {
            CommandResult::ok("migrate", format!("schema is current, {applied} migrations applied"))
        }
        Err((kind, detail)) => CommandResult::failed("migrate", kind, detail),
    }
}
