//! Minimal echo server: answers every request with its own body.
//!
//! Run with `cargo run --example echo`, then:
//!
//! ```text
//! curl -d 'hello' http://127.0.0.1:8080/echo
//! ```

use gale::prelude::*;

fn main() -> Result<(), ServerError> {
    env_logger::init();

    let mut server = Server::new(ServerConfig::new().with_num_threads(2));
    let factory = handler_factory(|ctx, req| {
        log::info!("{} {} from {}", req.method, req.path, ctx.client_ip);
        Ok(Response::ok()
            .with_header("Content-Type", "text/plain")
            .with_body(req.body.clone()))
    });

    let port = server.listen(ListenSpec::http(8080), &factory)?;
    println!("echo server listening on port {port}");

    loop {
        std::thread::park();
    }
}
