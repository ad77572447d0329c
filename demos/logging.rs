//! Logging demo
//!
//! Shows the events emitted while a request container is created, used and
//! deleted.
//!
//! Run with: `cargo run --example logging --features logging-pretty`

use scoped_dic::{BoxError, Builder, Definition, REQUEST, SUB_REQUEST};

struct Database {
    url: String,
}

struct RequestUser {
    name: String,
}

fn main() -> Result<(), BoxError> {
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    scoped_dic::logging::builder()
        .trace()
        .container_only()
        .pretty()
        .with_thread_names()
        .init();

    let mut builder = Builder::new(&[])?;
    builder
        .add(
            Definition::new("db")
                .build(|_| {
                    Ok::<_, BoxError>(Database {
                        url: "postgres://localhost/demo".into(),
                    })
                })
                .close(|db: &Database| {
                    println!("closing connection to {}", db.url);
                    Ok::<_, BoxError>(())
                }),
        )?
        .add(Definition::new("req-user").scope(REQUEST).build(|ctn| {
            let db = ctn.safe_get_as::<Database>("db")?;
            Ok::<_, BoxError>(RequestUser {
                name: format!("alice (from {})", db.url),
            })
        }))?
        .add(
            Definition::new("audit")
                .scope(SUB_REQUEST)
                .build(|_| Ok::<_, BoxError>(Vec::<String>::new()))
                .close(|_: &Vec<String>| Err("audit sink unavailable")),
        )?;

    let app = builder.build();

    let request = app.sub_container()?;
    let user = request.safe_get_as::<RequestUser>("req-user")?;
    println!("request user: {}", user.name);

    let sub = request.sub_container()?;
    sub.safe_get("audit")?;

    // The failing close hook is reported but does not stop the teardown
    if let Err(err) = request.delete_with_sub_containers() {
        println!("teardown finished with errors: {err}");
    }

    // A wider object requested from the application scope
    let audit = app.unscoped_safe_get("audit");
    println!("unscoped audit built: {}", audit.is_ok());
    let _ = app.clean();

    app.delete_with_sub_containers()?;
    Ok(())
}
