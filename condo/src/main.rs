use std::process;

use condo::app_context::AppContext;
use condo::query;
use tokio::runtime::Runtime;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt().with_thread_ids(true).init();

    let rt = Runtime::new().expect("failed to build Tokio runtime");

    let ctx = rt.block_on(AppContext::bootstrap())?;

    tracing::info!("condo running (PID: {})", process::id());

    if let Some(port) = ctx.query_port() {
        let handle = ctx.reconciler.clone();
        rt.spawn(async move {
            if let Err(e) = query::serve(port, handle).await {
                tracing::error!(error = ?e, "query endpoint exited");
            }
        });
    }

    rt.block_on(ctx.join());

    Ok(())
}
