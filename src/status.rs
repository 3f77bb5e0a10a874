use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::remote::RemoteSyncClient;

pub async fn run_status(config: &Config) -> Result<()> {
    println!("{:<12} {:<44} HEALTHY", "COMPONENT", "DETAIL");

    // Database
    let db_healthy = match db::connect(config).await {
        Ok(pool) => {
            let ok = sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&pool)
                .await
                .is_ok();
            pool.close().await;
            ok
        }
        Err(_) => false,
    };
    println!(
        "{:<12} {:<44} {}",
        "database",
        config.db.path.display(),
        db_healthy
    );

    // Scan root
    let root_exists = config.scan.root.exists();
    println!(
        "{:<12} {:<44} {}",
        "scan root",
        config.scan.root.display(),
        root_exists
    );

    // Remote
    match &config.remote {
        Some(remote_config) => {
            let healthy = match RemoteSyncClient::new(remote_config) {
                Ok(client) => client.fetch_competitors().await.is_ok(),
                Err(_) => false,
            };
            println!(
                "{:<12} {:<44} {}",
                "remote", remote_config.base_url, healthy
            );
        }
        None => {
            println!("{:<12} {:<44} {}", "remote", "NOT CONFIGURED", false);
        }
    }

    Ok(())
}
