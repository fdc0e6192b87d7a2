/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{net::SocketAddr, sync::Arc};

use divan::Bencher;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use switchyard::{
    filters::{Pass, StaticFilter},
    listener::{
        specificity::Attributes, ConnectionInfo, Dispatcher, Filter, FilterChain,
        FilterChainMatch, FilterChainTable, Listener, ListenerRegistry,
    },
};

fn main() {
    divan::main();
}

/// Chains matching distinct server names and source networks, plus a catch
/// all.
fn chains(count: usize) -> Vec<FilterChain> {
    (0..count)
        .map(|index| {
            let criteria = match index {
                0 => FilterChainMatch::default(),
                index if index % 2 == 0 => FilterChainMatch {
                    server_names: vec![format!("*.tenant-{index}.example.com")],
                    ..<_>::default()
                },
                index => FilterChainMatch {
                    source_prefix_ranges: vec![format!("10.{}.{}.0/24", index / 256, index % 256)
                        .parse()
                        .unwrap()],
                    destination_port: Some(443),
                    ..<_>::default()
                },
            };

            FilterChain::named(format!("chain-{index}"))
                .with_match(criteria)
                .with_filter(Filter::new(Pass::NAME))
        })
        .collect()
}

fn connections(count: usize) -> Vec<(SocketAddr, Option<String>)> {
    (0..count)
        .map(|index| {
            let source = ([10, (index / 256) as u8, (index % 256) as u8, 7], 40000).into();
            let server_name = (index % 3 == 0).then(|| format!("api.tenant-{index}.example.com"));
            (source, server_name)
        })
        .collect()
}

#[divan::bench(args = [1, 8, 64, 512])]
fn select(b: Bencher<'_, '_>, count: usize) {
    let table = FilterChainTable::build("bench", &chains(count)).unwrap();
    let destination: SocketAddr = ([127, 0, 0, 1], 443).into();
    let connections = connections(count);
    let mut rand = StdRng::seed_from_u64(42);

    b.with_inputs(|| connections.choose(&mut rand).unwrap().clone())
        .bench_local_values(|(source, server_name)| {
            let attributes =
                Attributes::new(source, destination).with_server_name(server_name.as_deref());
            divan::black_box(table.select(&attributes).map(|(_, specificity)| specificity));
        });
}

#[divan::bench(args = [1, 8, 64, 512])]
fn dispatch(b: Bencher<'_, '_>, count: usize) {
    let local: SocketAddr = ([127, 0, 0, 1], 443).into();
    let registry = Arc::new(ListenerRegistry::default());
    registry
        .replace(vec![Listener {
            filter_chains: chains(count),
            ..Listener::new("bench", local)
        }])
        .unwrap();
    let dispatcher = Dispatcher::new(registry);
    let connections = connections(count);
    let mut rand = StdRng::seed_from_u64(42);

    b.with_inputs(|| {
        let (source, server_name) = connections.choose(&mut rand).unwrap().clone();
        ConnectionInfo::new(source, local).with_server_name(server_name)
    })
    .bench_local_values(|info| divan::black_box(dispatcher.dispatch(&info).is_match()));
}
