use mapper_types::{DeviceId, Direction, ProcessLocation, MapStatus, ScalarType, SignalId, Timetag};

/// A remote shadow of a device: only the metadata replicated over the bus,
/// never an OSC/Bus handle or allocator state (REDESIGN FLAGS, "doubly-role
/// structs"). The root crate's local `Device` holds one of these for itself
/// plus a `Graph` full of them for every peer it has heard from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub version: u32,
    pub last_sync: Timetag,
}

impl DeviceRecord {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        DeviceRecord { id, name: name.into(), host: None, port: None, version: 0, last_sync: Timetag::ZERO }
    }
}

/// Remote shadow of a signal (data model §3 "Signal"), carrying just enough
/// to negotiate and route maps — not the instance storage itself, which
/// lives only on the owning device.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub id: SignalId,
    pub device: DeviceId,
    pub name: String,
    pub direction: Direction,
    pub scalar_type: ScalarType,
    pub vec_len: usize,
    pub num_inst: usize,
    pub ephemeral: bool,
}

/// Remote shadow of a map's negotiated metadata (data model §3 "Map").
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord {
    pub id: u64,
    pub sources: Vec<SignalId>,
    pub destination: SignalId,
    pub expr: Option<String>,
    pub process_location: ProcessLocation,
    pub num_inst: usize,
    pub status: MapStatus,
}
