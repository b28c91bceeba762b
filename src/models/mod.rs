pub mod chat;
pub mod identity;
pub mod room;
pub mod vitals;

pub use chat::{ChatKind, ChatRecord};
pub use identity::{Claims, Identity, Role};
pub use room::{
    ConnectionMeta, CreateRoomRequest, CreateRoomResponse, DeviceType, MediaState, MediaTrack,
    Participant, Room, RoomInfo, RoomState,
};
pub use vitals::{BloodPressure, VitalSigns, VitalsRecord};
