pub mod decoder;
pub mod encoder;
pub mod value;

pub use decoder::{decode, decode_command};
pub use encoder::{encode, encode_rdb_payload};
pub use value::RespValue;
