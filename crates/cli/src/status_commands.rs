use {
    anyhow::Result,
    dirmon_config::DirmonConfig,
    dirmon_monitor::store::summarize,
};

use crate::open_store;

pub async fn handle_status(config: &DirmonConfig) -> Result<()> {
    let store = open_store(config).await?;
    let summary = summarize(&store).await?;

    if let Some(dir) = &config.monitor.dir {
        println!("Directory: {}", dir.display());
    }
    println!("Database:  {}", config.database_url());
    println!("Processor: {}", config.processor.id);
    println!();
    println!("{:<20} {:>8}", "status", "records");
    for (status, count) in &summary.by_status {
        println!("{:<20} {count:>8}", status.to_string());
    }
    println!("{:<20} {:>8}", "total", summary.total);

    if summary.pending() > 0 {
        println!("\n{} record(s) awaiting retry", summary.pending());
    }
    Ok(())
}
