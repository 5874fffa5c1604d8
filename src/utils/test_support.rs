/// Integration tests stand up `httpmock` servers on localhost; some sandboxes refuse the bind.
pub fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping mock-upstream test: localhost bind is not permitted here");
            true
        }
        Err(err) => panic!("failed to bind localhost for mock upstreams: {err}"),
    }
}
