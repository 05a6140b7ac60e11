use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use roundup_lib::geocode::{GeocodeResolver, GeonamesClient, MapquestClient};
use roundup_lib::matching::dedup::run_market_deduplication;
use roundup_lib::premises::{
    locate_market_premises, resolve_roundup_movements, CountyDistanceTable,
};
use roundup_lib::store::postgres::PgStore;
use roundup_lib::utils::db_connect::{connect, connect_ctyod, get_pool_status};
use roundup_lib::utils::decisions::DecisionPolicy;
use roundup_lib::utils::env::load_env;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging and environment
    env_logger::init();
    info!("Starting livestock movement resolution pipeline");
    load_env();

    let policy = DecisionPolicy::from_env();
    policy.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    let ctyod_pool = connect_ctyod()
        .await
        .context("Failed to connect to county distance database")?;

    let run_id = Uuid::new_v4();
    info!("Pipeline run {}", run_id);

    let store = PgStore::new(&pool)
        .await
        .context("Failed to set up the movement store")?;
    let places = GeonamesClient::from_env(policy).context("Failed to set up place search")?;
    let structured = MapquestClient::from_env().context("Failed to set up structured lookup")?;
    let resolver = GeocodeResolver::new(places, structured, policy);
    let distances = CountyDistanceTable::new(ctyod_pool);

    let multi_progress = MultiProgress::new();
    let main_pb = multi_progress.add(ProgressBar::new(3));
    main_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    let mut phase_times: HashMap<&str, Duration> = HashMap::new();

    main_pb.set_message("Phase 1: Market deduplication");
    let phase_start = Instant::now();
    let chains = run_market_deduplication(&store)
        .await
        .context("Market deduplication failed")?;
    phase_times.insert("market_deduplication", phase_start.elapsed());
    info!("Phase 1 complete: {} chains resolved", chains);
    main_pb.inc(1);

    main_pb.set_message("Phase 2: Market premises location");
    let phase_start = Instant::now();
    let located = locate_market_premises(&store, &resolver)
        .await
        .context("Market premises location failed")?;
    phase_times.insert("market_location", phase_start.elapsed());
    info!("Phase 2 complete: {} premises located", located);
    main_pb.inc(1);

    main_pb.set_message("Phase 3: Roundup movement resolution");
    let phase_start = Instant::now();
    let resolved = resolve_roundup_movements(&store, &resolver, &distances)
        .await
        .context("Roundup movement resolution failed")?;
    phase_times.insert("movement_resolution", phase_start.elapsed());
    info!("Phase 3 complete: {} endpoint pairs resolved", resolved);
    main_pb.inc(1);

    main_pb.finish_with_message("Pipeline complete");

    info!("Pipeline run {} phase times:", run_id);
    let mut total = Duration::ZERO;
    for (phase, duration) in &phase_times {
        info!("  {}: {:.2?}", phase, duration);
        total += *duration;
    }
    info!("Total phase time: {:.2?}", total);

    let (max_size, available, in_use) = get_pool_status(&pool);
    info!(
        "Connection pool at exit: {}/{} in use ({} available)",
        in_use, max_size, available
    );

    Ok(())
}
