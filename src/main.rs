//! QAFederation 演示程序
//!
//! 功能：
//! 1. 注册一组内存分片 (主分片 / 热数据 / 冷数据 / 时序 / 凭证校验)
//! 2. 启动路由器与缓存的后台维护任务
//! 3. 执行几个典型查询 (单分片查找、多分片搜索、时序查询、缓存命中)
//! 4. 打印聚合结果与各模块洞察
//!
//! 运行: cargo run --bin qafederation-demo

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde_json::json;

use qafederation::observability;
use qafederation::query::{QueryFilter, QueryIntent, Record, TemporalScope};
use qafederation::shard::{InMemoryShard, ShardCapabilities, ShardKind, StorageTier};
use qafederation::utils::FederationConfig;
use qafederation::{InterpretedQuery, Orchestrator, ShardRegistry};

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

/// 生成演示订单数据
fn orders(prefix: &str, count: usize, start_ts: i64) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            record(json!({
                "id": format!("{}-{}", prefix, i),
                "customer": format!("c{}", rng.gen_range(0..20)),
                "total": (rng.gen_range(100..100_000) as f64) / 100.0,
                "timestamp": start_ts + i as i64 * 1_000,
            }))
        })
        .collect()
}

fn build_registry() -> Arc<ShardRegistry> {
    let registry = ShardRegistry::new();
    let now = chrono::Utc::now().timestamp_millis();

    registry.register(
        "users-primary",
        Arc::new(
            InMemoryShard::new(vec![
                record(json!({"id": "42", "name": "alice", "tier": "gold"})),
                record(json!({"id": "43", "name": "bob", "tier": "silver"})),
            ])
            .with_latency(Duration::from_millis(5)),
        ),
        ShardCapabilities::new(ShardKind::Primary, StorageTier::Hot).with_data_types(["users"]),
    );
    registry.register(
        "users-replica",
        Arc::new(
            InMemoryShard::new(vec![record(json!({"id": "42", "name": "alice", "tier": "gold"}))])
                .with_latency(Duration::from_millis(20)),
        ),
        ShardCapabilities::new(ShardKind::Data, StorageTier::Warm).with_data_types(["users"]),
    );
    registry.register(
        "orders-hot",
        Arc::new(InMemoryShard::new(orders("hot", 50, now - 60_000)).with_latency(Duration::from_millis(8))),
        ShardCapabilities::new(ShardKind::Data, StorageTier::Hot).with_data_types(["orders"]),
    );
    registry.register(
        "orders-cold",
        Arc::new(
            InMemoryShard::new(orders("cold", 200, now - 90 * 24 * 3_600_000))
                .with_latency(Duration::from_millis(40)),
        ),
        ShardCapabilities::new(ShardKind::Data, StorageTier::Cold).with_data_types(["orders"]),
    );
    registry.register(
        "events-ts",
        Arc::new(InMemoryShard::new(orders("evt", 100, now - 3_600_000)).with_latency(Duration::from_millis(12))),
        ShardCapabilities::new(ShardKind::TimeSeries, StorageTier::Hot).with_data_types(["orders", "events"]),
    );
    registry.register(
        "auth-tokens",
        Arc::new(InMemoryShard::new(vec![record(json!({"token": "tok-demo", "user": "42"}))])),
        ShardCapabilities::new(ShardKind::TokenValidation, StorageTier::Hot)
            .with_data_types(["users", "sessions"]),
    );

    Arc::new(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 加载配置
    let config = match FederationConfig::load_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config file: {}, using defaults", e);
            FederationConfig::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    observability::init_metrics();

    // 2. 构建编排器并启动后台任务
    let orchestrator = Arc::new(Orchestrator::new(config, build_registry()));
    let background = orchestrator.start_background();
    orchestrator.router().refresh_load_estimates().await;

    // 3. 执行查询
    let queries = vec![
        InterpretedQuery::new("find user 42", "users")
            .with_intent(QueryIntent::Lookup)
            .with_filter(QueryFilter::eq("id", "42"))
            .with_targets(["users-primary"]),
        InterpretedQuery::new("search orders of c7", "orders")
            .with_intent(QueryIntent::Search)
            .with_filter(QueryFilter::eq("customer", "c7")),
        InterpretedQuery::new("recent orders", "orders").with_temporal(TemporalScope::Recent),
        InterpretedQuery::new("average order total", "orders").with_intent(QueryIntent::Aggregate),
    ];

    for query in queries.iter().chain(queries.iter().take(1)) {
        let response = orchestrator
            .execute_query(query)
            .await
            .with_context(|| format!("query '{}' failed", query.text))?;

        println!(
            "\n── {} ─ strategy={} records={} from_cache={}",
            query.text,
            response.result.metadata.strategy,
            response.result.record_count(),
            response.from_cache
        );
        if let Some(plan) = &response.plan {
            println!(
                "   plan: {} phases, {} fragments, est {:.1}ms",
                plan.phases.len(),
                plan.fragment_count(),
                plan.estimated_duration_ms
            );
        }
        for suggestion in &response.result.insights.suggestions {
            println!("   • {}", suggestion);
        }
    }

    // 4. 洞察
    println!("\nRouting insights:\n{}", serde_json::to_string_pretty(&orchestrator.routing_insights())?);
    println!("\nCache insights:\n{}", serde_json::to_string_pretty(&orchestrator.cache_insights())?);
    println!("\nPlanner insights:\n{}", serde_json::to_string_pretty(&orchestrator.planner_insights())?);
    println!("\nOrchestrator stats:\n{}", serde_json::to_string_pretty(&orchestrator.stats())?);
    println!("\nMetrics:\n{}", observability::gather_metrics());

    background.shutdown().await;
    Ok(())
}
