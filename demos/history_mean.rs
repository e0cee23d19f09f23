//! A local-only map computing a 5-sample moving average:
//! `y = history(5).x.mean();`. Both signals live on the same device, so
//! the map never touches the wire.

use std::time::Duration;

use meshmap::{Device, DeviceConfig, Direction, InProcessBus, InProcessClock, ProcessLocation, ScalarType};

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let registry = meshmap::BusRegistry::new();
    let mut dev = Device::new(
        DeviceConfig::new("filter"),
        Box::new(InProcessBus::join(&registry, "filter-proc")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();

    while !dev.is_ready() {
        dev.poll(Duration::from_millis(50));
    }

    let raw = dev.add_signal("raw", Direction::Out, ScalarType::F64, 1, 1, false).unwrap();
    let smoothed = dev.add_signal("smoothed", Direction::In, ScalarType::F64, 1, 1, false).unwrap();
    dev.create_map(vec![raw], smoothed, Some("y = history(5).x.mean();"), ProcessLocation::Destination, 1)
        .unwrap();

    let samples = [1.0, 3.0, 2.0, 5.0, 4.0, 9.0, 1.0, 0.0];
    for &v in &samples {
        dev.set_value(raw, 0, meshmap::Vector::F64(vec![v])).unwrap();
        dev.poll(Duration::from_millis(0));
        println!("raw={v} -> smoothed={:?}", dev.signal_value(smoothed, 0));
    }
}
