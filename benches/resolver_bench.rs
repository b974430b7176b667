//! Benchmarks for address selection and DNS reply parsing.
//!
//! Both run once per hostname CONNECT, so they sit on the request path.

use criterion::{BenchmarkId, Criterion, Throughput, black_box};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use egress_socks::dns::{DnsQuery, DnsResponse, TYPE_A};
use egress_socks::resolver::AddressPreference;

fn random_candidates(len: usize, v4_share: f64) -> Vec<IpAddr> {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            if rng.random_bool(v4_share) {
                IpAddr::V4(Ipv4Addr::from(rng.random::<u32>()))
            } else {
                IpAddr::V6(Ipv6Addr::from(rng.random::<u128>()))
            }
        })
        .collect()
}

fn build_reply(answers: usize) -> Vec<u8> {
    let mut data = DnsQuery::new(0x1234, "example.com", TYPE_A).to_bytes().unwrap();
    data[2..4].copy_from_slice(&0x8180u16.to_be_bytes());
    data[6..8].copy_from_slice(&(answers as u16).to_be_bytes());
    for i in 0..answers {
        data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to question name
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // Type A, class IN
        data.extend_from_slice(&300u32.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x04]);
        data.extend_from_slice(&[93, 184, 216, i as u8]);
    }
    data
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    group.throughput(Throughput::Elements(1));

    for (name, share) in [("mixed", 0.5), ("v6_only", 0.0)] {
        let candidates = random_candidates(8, share);
        group.bench_function(BenchmarkId::new("ipv4_first", name), |b| {
            b.iter(|| AddressPreference::Ipv4First.select(black_box(&candidates)))
        });
    }

    group.finish();
}

fn bench_parse_reply(c: &mut Criterion) {
    let mut group = c.benchmark_group("dns_reply");

    for answers in [1usize, 8] {
        let reply = build_reply(answers);
        group.bench_function(BenchmarkId::new("parse", answers), |b| {
            b.iter(|| {
                let parsed = DnsResponse::parse(black_box(&reply)).unwrap();
                parsed.addresses(TYPE_A).count()
            })
        });
    }

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_select(&mut criterion);
    bench_parse_reply(&mut criterion);
    criterion.final_summary();
}
