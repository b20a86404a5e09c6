use anyhow::Context;
use visit_counter::{app::AppData, config::Config, error::CounterError};

const USAGE: &str = "usage: pageview <hit|get|show> <key>...";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_path().with_context(|| "fail to load config")?;
    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level()?)
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next().with_context(|| USAGE)?;
    let keys: Vec<String> = args.collect();
    if keys.is_empty() {
        anyhow::bail!(USAGE);
    }

    let app_data = AppData::connect(config).await?;
    tracing::info!("Connected to redis at {}", app_data.config.redis_addr);

    match command.as_str() {
        "hit" => hit(&app_data, &keys).await,
        "get" => get(&app_data, &keys).await,
        "show" => show(&app_data, &keys).await,
        other => anyhow::bail!("unknown command `{other}`\n{USAGE}"),
    }
}

async fn hit(app_data: &AppData, keys: &[String]) -> anyhow::Result<()> {
    for key in keys {
        let count = app_data
            .counter
            .record_visit(key)
            .await
            .with_context(|| format!("fail to record visit to `{key}`"))?;
        println!("{key}\t{count}");
    }
    Ok(())
}

async fn get(app_data: &AppData, keys: &[String]) -> anyhow::Result<()> {
    for key in keys {
        match app_data.counter.get_count(key).await {
            Ok(count) => println!("{key}\t{count}"),
            Err(CounterError::NotFound(_)) => println!("{key}\t0"),
            Err(err) => return Err(err).with_context(|| format!("fail to read `{key}`")),
        }
    }
    Ok(())
}

async fn show(app_data: &AppData, keys: &[String]) -> anyhow::Result<()> {
    for key in keys {
        match app_data.counter.get_counter(key).await {
            Ok(row) => println!(
                "{}\t{}\t{}",
                row.key,
                row.count,
                row.last_updated.to_rfc3339()
            ),
            Err(CounterError::NotFound(key)) => println!("{key}\tnever visited"),
            Err(err) => return Err(err).with_context(|| format!("fail to read `{key}`")),
        }
    }
    Ok(())
}
