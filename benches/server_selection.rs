//! Benchmarks for rustsdam components.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use rustsdam::ClusterSettings;
use rustsdam::description::{
    ClusterDescription, ClusterId, ClusterType, ReplicaSetConfig, ServerDescription, ServerId,
    ServerType, WireVersionRange,
};
use rustsdam::replay::{Scenario, parse_scenario, run_scenario};
use rustsdam::selector::{
    CompositeServerSelector, LatencyLimitingServerSelector, OperationsCountServerSelector,
    ReadPreference, ReadPreferenceServerSelector, ServerSelector, WritableServerSelector,
};
use std::sync::Arc;
use std::time::Duration;

fn replica_set(members: usize) -> ClusterDescription {
    let cluster_id = ClusterId::from_value(1);
    let hosts: Vec<_> = (0..members)
        .map(|i| format!("db{i}.example.com:27017").parse().unwrap())
        .collect();

    let mut description = ClusterDescription::new(cluster_id, false).with_type(ClusterType::ReplicaSet);
    for (i, host) in hosts.iter().enumerate() {
        let server_type = if i == 0 {
            ServerType::ReplicaSetPrimary
        } else {
            ServerType::ReplicaSetSecondary
        };
        let config = ReplicaSetConfig::new(hosts.clone(), Some("rs0".to_string()), None, Some(1));
        let server = ServerDescription::connected(ServerId::new(cluster_id, host.clone()), server_type)
            .wire_version_range(WireVersionRange::new(8, 21))
            .replica_set_config(config)
            .average_round_trip_time(Duration::from_millis(1 + i as u64 * 3))
            .build();
        description = description.with_server_description(server);
    }
    description
}

fn benchmark_read_preference(c: &mut Criterion) {
    let description = replica_set(7);
    let selector = ReadPreferenceServerSelector::new(ReadPreference::secondary_preferred());

    c.bench_function("read_preference_select", |b| {
        b.iter(|| {
            let candidates: Vec<_> = description.servers().iter().collect();
            black_box(selector.select_servers(&description, candidates));
        })
    });
}

fn benchmark_selector_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector_chain");

    for members in [3, 7, 50] {
        let description = replica_set(members);
        let operations: OperationsCountServerSelector = description
            .servers()
            .iter()
            .enumerate()
            .map(|(i, s)| (s.endpoint().clone(), (i % 3) as u32))
            .collect();
        let chain = CompositeServerSelector::new(vec![
            Arc::new(ReadPreferenceServerSelector::new(ReadPreference::nearest())),
            Arc::new(LatencyLimitingServerSelector::new(Duration::from_millis(15))),
            Arc::new(operations),
        ]);

        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(format!("{members}_members"), |b| {
            b.iter(|| {
                let candidates: Vec<_> = description.servers().iter().collect();
                black_box(chain.select_servers(&description, candidates));
            })
        });
    }

    group.finish();
}

fn benchmark_writable(c: &mut Criterion) {
    let description = replica_set(7);

    c.bench_function("writable_select", |b| {
        b.iter(|| {
            let candidates: Vec<_> = description.servers().iter().collect();
            black_box(WritableServerSelector.select_servers(&description, candidates));
        })
    });
}

fn failover_scenario() -> Scenario {
    let yaml = r#"
settings:
  endpoints: ["a:27017", "b:27017", "c:27017"]
phases:
  - responses:
      - endpoint: a:27017
        reply: { type: replica_set_primary, set_name: rs0, hosts: ["a:27017", "b:27017", "c:27017"], set_version: 1, election_id: "000000000000000000000001" }
      - endpoint: b:27017
        reply: { type: replica_set_secondary, set_name: rs0, hosts: ["a:27017", "b:27017", "c:27017"] }
      - endpoint: c:27017
        reply: { type: replica_set_secondary, set_name: rs0, hosts: ["a:27017", "b:27017", "c:27017"] }
  - responses:
      - endpoint: a:27017
        error: connection reset
      - endpoint: b:27017
        reply: { type: replica_set_primary, set_name: rs0, hosts: ["a:27017", "b:27017", "c:27017"], set_version: 1, election_id: "000000000000000000000002" }
"#;
    parse_scenario(yaml).unwrap()
}

fn benchmark_reducer(c: &mut Criterion) {
    let scenario = failover_scenario();
    let settings = ClusterSettings::default();

    let mut group = c.benchmark_group("reducer");
    group.throughput(Throughput::Elements(5));
    group.bench_function("replica_set_failover", |b| {
        b.iter(|| {
            black_box(run_scenario(&scenario, &settings).unwrap());
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_read_preference,
    benchmark_selector_chain,
    benchmark_writable,
    benchmark_reducer,
);
criterion_main!(benches);
