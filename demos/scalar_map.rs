//! Two devices on an in-process bus: `source.0/out` feeds `dest.0/in`
//! through `y = x * 2 + 1;`, evaluated on the destination.

use std::time::Duration;

use meshmap::{
    BusRegistry, Device, DeviceConfig, Direction, InProcessBus, InProcessClock, ProcessLocation,
    ScalarType,
};

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let registry = BusRegistry::new();
    let mut source = Device::new(
        DeviceConfig::new("source"),
        Box::new(InProcessBus::join(&registry, "source-proc")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();
    let mut dest = Device::new(
        DeviceConfig::new("dest"),
        Box::new(InProcessBus::join(&registry, "dest-proc")),
        Box::new(InProcessClock::new()),
    )
    .unwrap();

    while !source.is_ready() || !dest.is_ready() {
        source.poll(Duration::from_millis(50));
        dest.poll(Duration::from_millis(50));
    }
    tracing::info!(source = %source.name(), dest = %dest.name(), "devices locked");

    let out = source.add_signal("out", Direction::Out, ScalarType::F32, 1, 1, false).unwrap();
    let inp = dest.add_signal("in", Direction::In, ScalarType::F32, 1, 1, false).unwrap();

    let map_id = dest
        .create_map(vec![out], inp, Some("y = x * 2 + 1;"), ProcessLocation::Destination, 1)
        .unwrap();

    for tick in 0..20 {
        source.set_value(out, 0, meshmap::Vector::F32(vec![tick as f32])).unwrap();
        for _ in 0..3 {
            source.poll(Duration::from_millis(10));
            dest.poll(Duration::from_millis(10));
        }
        if let Some(y) = dest.signal_value(inp, 0) {
            println!("tick {tick}: out={tick} -> in={y:?}");
        }
    }

    println!("map status: {:?}", dest.map_status(map_id));
}
