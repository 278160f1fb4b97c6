//! Property-based tests for inbound ordering.
//!
//! Whatever the server sends, in whatever amount, the terminal shows it in
//! the same order, with nothing dropped.

use std::time::Duration;

use proptest::prelude::*;
use tether_client::{Session, SessionConfig, SessionOutcome, Terminal, memory};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Printable single-line chat text.
fn line_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?]{0,40}"
}

/// Send `lines` from the server and collect what the terminal shows.
async fn render_through_session(lines: Vec<String>, output_buffer: usize) -> Vec<String> {
    let (conn, peer) = memory::pair(4);
    let (input, session_input) = tokio::io::duplex(64);
    let (session_output, output) = tokio::io::duplex(output_buffer);

    let session = tokio::spawn(Session::new(conn, SessionConfig::default()).run(
        BufReader::new(session_input),
        Terminal::new(session_output),
        std::future::pending(),
    ));

    let count = lines.len();
    let sender = tokio::spawn(async move {
        for line in lines {
            peer.send(line).await.expect("session dropped connection");
        }
        peer
    });

    let mut output = BufReader::new(output).lines();
    let mut rendered = Vec::with_capacity(count);
    for _ in 0..count {
        let line = tokio::time::timeout(Duration::from_secs(5), output.next_line())
            .await
            .expect("display stalled")
            .expect("output closed")
            .expect("missing line");
        rendered.push(line);
    }

    let _peer = sender.await.expect("sender panicked");
    drop(input);
    let outcome = session.await.expect("session panicked");
    assert!(matches!(outcome, SessionOutcome::InputClosed));

    rendered
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_inbound_order_preserved(
        lines in prop::collection::vec(line_strategy(), 0..64),
        output_buffer in 1usize..256,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let rendered = runtime.block_on(render_through_session(lines.clone(), output_buffer));

        prop_assert_eq!(rendered, lines);
    }
}
