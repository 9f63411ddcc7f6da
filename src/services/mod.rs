//! Service layer: upstream client, SSE codec and call orchestration.

pub mod gateway;
pub mod sse;
pub mod upstream;

pub use gateway::{CallOrigin, CallOutcome, Gateway, GatewayReply, RelayStream, CLIENT_DISCONNECTED};
pub use upstream::{ChunkStream, CompletionKind, OpenAiClient, UpstreamClient, UpstreamReply};
