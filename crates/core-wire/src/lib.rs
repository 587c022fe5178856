//! Line I/O and framing: checksummed frame construction for both
//! controller channels, a bounded delimited-line reader, a tool-reply
//! validator, and the structured status-reply parser.

mod framing;
mod recv_buffer;
mod reply_parser;
mod tool_reply;

pub use framing::{frame_main, frame_tool, FramingError, MAX_FRAME_LEN};
pub use recv_buffer::{LineStatus, ReadLineError, RecvBuffer, MIN_CAPACITY};
pub use reply_parser::{parse_reply, ReplyParseError, ReplyValue};
pub use tool_reply::{validate_tool_reply, ToolReplyError};
