use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use conduit::diagnostic::Collector;
use conduit::execute::{execute, Config};
use conduit::operator::Operator;
use conduit::operators::{every, Collect, Delay, Emit, Every, Pass};
use conduit::pipeline::Pipeline;
use conduit::registry::Registry;

fn quiet() -> Config {
    Config { diagnostics: Arc::new(Collector::new()), ..Config::default() }
}

#[test]
fn delay_releases_nothing_before_its_anchor() {
    let step = Duration::from_millis(15);
    let (collect, collection) = Collect::new();
    let pipeline = Pipeline::new(vec![
        Box::new(Emit::generated(6, Some(step))),
        Box::new(Delay::new("time", 2.0).unwrap()),
        Box::new(collect),
    ]);
    let started = Instant::now();
    execute(pipeline, quiet()).unwrap().join().unwrap();

    let arrivals = collection.arrivals();
    assert_eq!(arrivals.len(), 6);
    for (index, arrival) in arrivals.iter().enumerate() {
        let anchor = step.mul_f64(index as f64 / 2.0);
        assert!(arrival.duration_since(started) >= anchor);
    }
    assert!(arrivals.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn every_reruns_its_source() {
    let (collect, collection) = Collect::new();
    let pipeline = Pipeline::new(vec![Box::new(Emit::numbered(2)), Box::new(Pass), Box::new(collect)]);
    let pipeline = every(Duration::from_millis(20), pipeline).unwrap();
    assert_eq!(pipeline.operators()[0].name(), "every");
    assert_eq!(pipeline.len(), 3);

    let execution = execute(pipeline, quiet()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while collection.len() < 6 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    execution.cancel();
    execution.join().unwrap();

    let arrivals = collection.arrivals();
    assert!(arrivals.len() >= 3);
    assert!(arrivals[2].duration_since(arrivals[0]) >= Duration::from_millis(20));
}

#[test]
fn nested_every_collapses() {
    let inner = Every::new(Duration::from_secs(1), Box::new(Emit::numbered(1))).unwrap();
    let outer = Every::new(Duration::from_millis(5), Box::new(inner)).unwrap();
    assert_eq!(outer.interval(), Duration::from_millis(5));
    assert_eq!(outer.inner().name(), "emit");

    let registry = Registry::builtins();
    let parsed = registry.parse("every 1s { emit 3 | pass } | discard").unwrap();
    let names = parsed.operators().iter().map(|op| op.name().to_string()).collect::<Vec<_>>();
    assert_eq!(names, vec!["every", "pass", "discard"]);
}
