//! Derive demo
//!
//! Generates typed accessors for the objects of an application and resolves
//! them from a request-like value carrying its container.
//!
//! Run with: `cargo run --example derive --features derive`

use scoped_dic::{
    Accessors, ActiveContainer, BoxError, Builder, Container, DiError, REQUEST, Result,
};
use std::sync::Arc;

struct Config {
    greeting: String,
}

struct Session {
    user: String,
}

#[derive(Accessors)]
#[accessors(trait_name = "Dic")]
#[allow(dead_code)]
struct AppObjects {
    config: Arc<Config>,
    #[accessor(name = "req-session")]
    session: Arc<Session>,
}

/// Inbound request holding its own container
struct Request {
    path: String,
    container: Container,
}

impl ActiveContainer for Request {
    fn active_container(&self) -> Option<Container> {
        Some(self.container.clone())
    }
}

fn handle(req: &Request) -> String {
    let config = AppObjects::config(req);
    let session = AppObjects::session(req);
    format!("{} {} on {}", config.greeting, session.user, req.path)
}

fn main() -> Result<()> {
    let mut builder = Builder::new(&[])?;
    builder
        .add(AppObjects::CONFIG.define(|_| {
            Ok::<_, BoxError>(Config {
                greeting: "hello".into(),
            })
        }))?
        .add(
            AppObjects::SESSION
                .define(|_| Ok::<_, BoxError>(Session { user: "bob".into() }))
                .scope(REQUEST),
        )?;
    let app = builder.build();

    for path in ["/users", "/orders"] {
        let req = Request {
            path: path.into(),
            container: app.sub_container()?,
        };
        println!("{}", handle(&req));
        req.container.delete()?;
    }

    // Typed retrieval straight from a container
    println!("config: {}", app.get_config().greeting);
    match app.safe_get_session() {
        Err(DiError::ScopeMismatch { .. }) => println!("sessions only exist inside requests"),
        other => println!("unexpected: {:?}", other.map(|s| s.user.clone())),
    }

    app.delete_with_sub_containers()
}
