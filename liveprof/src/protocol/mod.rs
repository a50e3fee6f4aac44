//! Wire protocol: frame codec and the sockets it runs over.

pub mod codec;
pub mod transport;

pub use codec::{
    decode_message, encode_frame, encode_message, read_frame, write_frame, StatsCodec, LENGTH_PREFIX,
    MAX_FRAME_LEN,
};
pub use transport::{connect, BoxedReader, BoxedWriter, Listener, Socket};
