//! Conformance suite run per transport, in the style of the shared testkit.

use crosswire::Transport;
use crosswire_testkit::{TestError, TransportFactory};
use std::sync::Once;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

struct MemFactory;

impl TransportFactory for MemFactory {
    async fn connect_pair() -> Result<(Transport, Transport), TestError> {
        Ok(Transport::mem_pair())
    }
}

mod mem {
    use super::*;

    #[tokio::test]
    async fn call_round_trip() {
        init_tracing();
        crosswire_testkit::run_call_round_trip::<MemFactory>().await;
    }

    #[tokio::test]
    async fn raw_request_reaches_fallback() {
        crosswire_testkit::run_raw_request_reaches_fallback::<MemFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_calls_resolve_by_id() {
        crosswire_testkit::run_concurrent_calls_resolve_by_id::<MemFactory>().await;
    }

    #[tokio::test]
    async fn notice_is_silent() {
        crosswire_testkit::run_notice_is_silent::<MemFactory>().await;
    }

    #[tokio::test]
    async fn unmatched_reply_is_inert() {
        crosswire_testkit::run_unmatched_reply_is_inert::<MemFactory>().await;
    }

    #[tokio::test]
    async fn close_drains_pending() {
        crosswire_testkit::run_close_drains_pending::<MemFactory>().await;
    }

    #[tokio::test]
    async fn error_response() {
        crosswire_testkit::run_error_response::<MemFactory>().await;
    }

    #[tokio::test]
    async fn reentrant_dispatch() {
        crosswire_testkit::run_reentrant_dispatch::<MemFactory>().await;
    }

    #[tokio::test]
    async fn string_target_resolution() {
        crosswire_testkit::run_string_target_resolution::<MemFactory>().await;
    }

    #[tokio::test]
    async fn callback_without_id_is_silent() {
        crosswire_testkit::run_callback_without_id_is_silent::<MemFactory>().await;
    }

    #[tokio::test]
    async fn session_tag_echo() {
        crosswire_testkit::run_session_tag_echo::<MemFactory>().await;
    }

    #[tokio::test]
    async fn inline_reply_for_non_duplex() {
        crosswire_testkit::run_inline_reply_for_non_duplex::<MemFactory>().await;
    }
}

#[cfg(feature = "websocket")]
mod websocket {
    use super::*;

    struct WsFactory;

    impl TransportFactory for WsFactory {
        async fn connect_pair() -> Result<(Transport, Transport), TestError> {
            Ok(Transport::websocket_pair().await)
        }
    }

    #[tokio::test]
    async fn call_round_trip() {
        init_tracing();
        crosswire_testkit::run_call_round_trip::<WsFactory>().await;
    }

    #[tokio::test]
    async fn raw_request_reaches_fallback() {
        crosswire_testkit::run_raw_request_reaches_fallback::<WsFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_calls_resolve_by_id() {
        crosswire_testkit::run_concurrent_calls_resolve_by_id::<WsFactory>().await;
    }

    #[tokio::test]
    async fn notice_is_silent() {
        crosswire_testkit::run_notice_is_silent::<WsFactory>().await;
    }

    #[tokio::test]
    async fn unmatched_reply_is_inert() {
        crosswire_testkit::run_unmatched_reply_is_inert::<WsFactory>().await;
    }

    #[tokio::test]
    async fn close_drains_pending() {
        crosswire_testkit::run_close_drains_pending::<WsFactory>().await;
    }

    #[tokio::test]
    async fn error_response() {
        crosswire_testkit::run_error_response::<WsFactory>().await;
    }

    #[tokio::test]
    async fn reentrant_dispatch() {
        crosswire_testkit::run_reentrant_dispatch::<WsFactory>().await;
    }

    #[tokio::test]
    async fn string_target_resolution() {
        crosswire_testkit::run_string_target_resolution::<WsFactory>().await;
    }

    #[tokio::test]
    async fn callback_without_id_is_silent() {
        crosswire_testkit::run_callback_without_id_is_silent::<WsFactory>().await;
    }

    #[tokio::test]
    async fn session_tag_echo() {
        crosswire_testkit::run_session_tag_echo::<WsFactory>().await;
    }

    #[tokio::test]
    async fn inline_reply_for_non_duplex() {
        crosswire_testkit::run_inline_reply_for_non_duplex::<WsFactory>().await;
    }
}
