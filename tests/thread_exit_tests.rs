//! Trees of exiting threads are captured into the shared buffer

use benchtree::config::thread_key;
use benchtree::report::Report;
use benchtree::{Bunch, Config, Environment, Record, Scope};
use std::time::Duration;

#[test]
fn test_worker_leaf_reported_exactly_once() {
    let env = Environment::new(Config::default());
    let worker_env = env.clone();

    let worker = std::thread::spawn(move || {
        worker_env
            .record_leaf(Record::new("work").with_elapsed(Duration::from_nanos(42)))
            .unwrap();
        std::thread::current().id()
    })
    .join()
    .unwrap();

    assert!(!env.is_registered(worker));
    assert!(env.registered_threads().is_empty());

    let document = env.flush_to_string().unwrap();
    assert_eq!(document.matches(r#""name":"work""#).count(), 1);

    let report = Report::parse(&document).unwrap();
    let section = report.thread(&thread_key(worker)).unwrap();
    assert_eq!(section.nodes.len(), 1);
    assert_eq!(section.nodes[0].elapsed_ns, 42);

    // Captured output is consumed by the flush
    assert_eq!(env.flush_to_string().unwrap(), "{}");
}

#[test]
fn test_many_workers_with_guards() {
    let env = Environment::new(Config::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let env = env.clone();
            std::thread::spawn(move || {
                let mut bunch = Bunch::in_env(&env, "worker");
                bunch.add_comment("index", i);
                for _ in 0..=i {
                    let _scope = Scope::in_env(&env, "step");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let report = Report::parse(&env.flush_to_string().unwrap()).unwrap();
    assert_eq!(report.threads.len(), 4);

    let mut steps: Vec<usize> = report
        .threads
        .iter()
        .map(|t| {
            let bunch = &t.nodes[0];
            assert_eq!(bunch.children_elapsed_ns(), bunch.elapsed_ns);
            bunch.children().len()
        })
        .collect();
    steps.sort_unstable();
    assert_eq!(steps, [1, 2, 3, 4]);
}

#[test]
fn test_open_bunch_at_exit_is_still_reported() {
    let env = Environment::new(Config::default());
    let worker_env = env.clone();
    std::thread::spawn(move || {
        worker_env.record_subtree_open(Record::new("unclosed")).unwrap();
        worker_env
            .record_leaf(Record::new("inside").with_elapsed(Duration::from_nanos(5)))
            .unwrap();
    })
    .join()
    .unwrap();

    let report = Report::parse(&env.flush_to_string().unwrap()).unwrap();
    let node = &report.threads[0].nodes[0];
    assert_eq!(node.name, "unclosed");
    assert_eq!(node.elapsed_ns, 5);
    assert_eq!(node.children()[0].name, "inside");
}

#[test]
fn test_named_threads_with_labels() {
    let env = Environment::new(Config::default().with_thread_labels(true));
    let worker_env = env.clone();
    std::thread::Builder::new()
        .name("loader".into())
        .spawn(move || {
            worker_env.record_leaf(Record::new("load")).unwrap();
        })
        .unwrap()
        .join()
        .unwrap();

    let report = Report::parse(&env.flush_to_string().unwrap()).unwrap();
    assert!(report.threads[0].thread.starts_with("loader@ThreadId("));
}

#[test]
fn test_disabled_environment_ignores_workers() {
    let env = Environment::new(Config::disabled());
    let worker_env = env.clone();
    std::thread::spawn(move || {
        let _scope = Scope::in_env(&worker_env, "ignored");
    })
    .join()
    .unwrap();

    assert_eq!(env.flush_to_string().unwrap(), "{}");
}
