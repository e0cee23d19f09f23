//! Two source devices feed a single instanced destination signal through
//! one convergent map (`y = x + x$1;`), each source driving its own
//! instance by GID.

use std::time::Duration;

use meshmap::{Device, DeviceConfig, Direction, InProcessBus, InProcessClock, ProcessLocation, ScalarType};

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let registry = meshmap::BusRegistry::new();
    let mut a = Device::new(
        DeviceConfig::new("sensor"),
        Box::new(InProcessBus::join(&registry, "sensor-a")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();
    let mut b = Device::new(
        DeviceConfig::new("sensor"),
        Box::new(InProcessBus::join(&registry, "sensor-b")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();
    let mut sink = Device::new(
        DeviceConfig::new("sink"),
        Box::new(InProcessBus::join(&registry, "sink-proc")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();

    while !a.is_ready() || !b.is_ready() || !sink.is_ready() {
        a.poll(Duration::from_millis(50));
        b.poll(Duration::from_millis(50));
        sink.poll(Duration::from_millis(50));
    }

    let out_a = a.add_signal("level", Direction::Out, ScalarType::F32, 1, 4, false).unwrap();
    let out_b = b.add_signal("level", Direction::Out, ScalarType::F32, 1, 4, false).unwrap();
    let combined = sink.add_signal("combined", Direction::In, ScalarType::F32, 1, 4, false).unwrap();

    sink.create_map(
        vec![out_a, out_b],
        combined,
        Some("y = x + x$1;"),
        ProcessLocation::Destination,
        4,
    )
    .unwrap();

    for i in 0..4 {
        a.set_value(out_a, i, meshmap::Vector::F32(vec![1.0])).unwrap();
    }
    for i in 0..4 {
        b.set_value(out_b, i, meshmap::Vector::F32(vec![10.0])).unwrap();
    }

    for _ in 0..6 {
        a.poll(Duration::from_millis(10));
        b.poll(Duration::from_millis(10));
        sink.poll(Duration::from_millis(10));
    }

    for i in 0..4 {
        println!("instance {i}: combined = {:?}", sink.signal_value(combined, i));
    }

    a.release_instance(out_a, 2).unwrap();
    for _ in 0..6 {
        a.poll(Duration::from_millis(10));
        b.poll(Duration::from_millis(10));
        sink.poll(Duration::from_millis(10));
    }
    println!("after releasing instance 2 on sensor-a: {:?}", sink.signal_value(combined, 2));
}
