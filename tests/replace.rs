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

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use switchyard::{
    listener::{ConnectionInfo, Dispatcher, Listener, ListenerRegistry},
    test::{echo_chain, listener},
};

const PORTS: [u16; 3] = [7101, 7102, 7103];

/// Every listener of a generation runs a chain named after it.
fn generation(tag: &str) -> Vec<Listener> {
    PORTS
        .iter()
        .map(|port| listener(&format!("l{port}"), *port, vec![echo_chain(tag)]))
        .collect()
}

#[test]
fn concurrent_dispatch_sees_whole_generations() {
    let registry = Arc::new(ListenerRegistry::default());
    registry.replace(generation("even")).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let dispatcher = Dispatcher::new(registry.clone());
                let mut observed = 0usize;

                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snapshot = registry.snapshot();
                    let tags: Vec<String> = snapshot
                        .iter()
                        .flat_map(|instance| instance.table().iter())
                        .map(|chain| chain.name().to_string())
                        .collect();
                    assert_eq!(PORTS.len(), tags.len());
                    assert!(tags.iter().all(|tag| *tag == tags[0]), "mixed snapshot {tags:?}");

                    for port in PORTS {
                        let local: SocketAddr = ([127, 0, 0, 1], port).into();
                        let info = ConnectionInfo::new(([10, 0, 0, 1], 4000).into(), local);
                        // an instance retired between lookup and binding is a no match.
                        if let Some(binding) = dispatcher.dispatch(&info).binding() {
                            let chain = binding.chain().name().to_string();
                            assert!(
                                binding
                                    .listener()
                                    .config()
                                    .filter_chains
                                    .iter()
                                    .any(|config| config.name.as_deref() == Some(&*chain)),
                                "{chain} doesn't belong to its listener"
                            );
                            observed += 1;
                        }
                    }

                    if finished {
                        break;
                    }
                }

                observed
            })
        })
        .collect();

    for round in 0..500 {
        let tag = if round % 2 == 0 { "odd" } else { "even" };
        registry.replace(generation(tag)).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(501, registry.snapshot().generation());
}

#[test]
fn rejected_update_keeps_serving() {
    let registry = Arc::new(ListenerRegistry::default());
    registry.replace(generation("good")).unwrap();
    let before = registry.snapshot();

    let mut bad = generation("bad");
    bad[1].filter_chains.clear();
    assert!(registry.replace(bad).is_err());

    let after = registry.snapshot();
    assert!(Arc::ptr_eq(&before, &after));

    let dispatcher = Dispatcher::new(registry);
    let binding = dispatcher
        .dispatch(&ConnectionInfo::new(
            ([10, 0, 0, 1], 4000).into(),
            ([127, 0, 0, 1], PORTS[1]).into(),
        ))
        .binding()
        .unwrap();
    assert_eq!("good", &**binding.chain().name());
}
