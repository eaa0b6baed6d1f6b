//! Core wire types.

mod frame;

pub use frame::{
    CONTROL_STREAM_ID, FRAME_FIXED_HEADER_SIZE, FRAME_MAX_HEADER_SIZE, Frame, FrameIter,
    FrameType,
};
