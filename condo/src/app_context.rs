//! Bootstrap wiring, in the teacher's `AppContext` shape: CLI parse →
//! collaborators → reconciler → (optional) query endpoint.

use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use condo_core::consul::HttpConsulClient;
use condo_core::validator::MinimalSchemaValidator;

use crate::config::cli::Cli;
use crate::reconciler::{self, ReconcilerHandle};

pub struct AppContext {
    cli: Cli,
    pub reconciler: ReconcilerHandle,
    reconciler_task: tokio::task::JoinHandle<()>,
}

impl AppContext {
    pub async fn bootstrap() -> miette::Result<AppContext> {
        let command = Cli::command().before_help(BANNER).get_matches();
        let cli = Cli::from_arg_matches(&command).expect("failed to parse CLI arguments");

        tracing::info!(?cli, "CLI config parsed");

        let client = Arc::new(HttpConsulClient::new(
            cli.consul_addr.clone(),
            cli.long_poll_wait(),
        )?);
        let validator = Arc::new(MinimalSchemaValidator);

        let (reconciler, reconciler_task) = reconciler::spawn(
            client,
            validator,
            cli.nodes_prefix.clone(),
            cli.roles_prefix.clone(),
            cli.services_prefix.clone(),
        )
        .await?;

        Ok(AppContext {
            cli,
            reconciler,
            reconciler_task,
        })
    }

    pub fn query_port(&self) -> Option<u16> {
        self.cli.query_port
    }

    pub async fn join(self) {
        let _ = self.reconciler_task.await;
    }
}

const BANNER: &str = r#"
   ___ ___ _  _ ___  ___
  / __/ _ \ \| |   \/ _ \
 | (_| (_) | .` | |) | (_) |
  \___\___/|_|\_|___/\___/
      /\_/\
     ( o.o )  condo v0.1.0
      > ^ <   Watching the nodes prefix...
"#;
