//! Notification requests and the dispatch pipeline.
//!
//! # Pipeline
//!
//! `NotificationDispatcher::dispatch` runs each request through:
//!
//! 1. idempotency lookup (`IdempotencyStore`)
//! 2. blacklist check (`BlacklistChecker`)
//! 3. rate limit (`RateLimiter`)
//! 4. template resolution and rendering
//! 5. `before_send` interceptors
//! 6. sender resolution and the provider call, with retry
//! 7. `after_send` / `on_error` interceptors
//!
//! Notices are kept in step with the pipeline by the `NoticeRecorder`
//! interceptor rather than by the dispatcher itself.

mod config_source;
mod dispatcher;
mod interceptor;
mod notice;
mod types;

pub use config_source::{ChannelConfigSource, StaticChannelConfigs};
pub use dispatcher::{
    DispatcherBuilder, DispatcherStats, DispatcherStatsSnapshot, NotificationDispatcher,
};
pub use interceptor::{
    DispatchInstrumentation, DispatchInterceptor, LoggingInterceptor, NoopInstrumentation,
    ShortCircuit,
};
pub use notice::{MemoryNoticeStore, Notice, NoticeError, NoticeRecorder, NoticeStatus, NoticeStore};
pub use types::{
    MessageContent, RenderedContent, SendReceipt, SendRequest, SendRequestBuilder,
    SenderConfiguration, TemplateArgs, DEFAULT_TENANT,
};
