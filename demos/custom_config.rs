use std::time::Duration;
use typewriter::*;

static FAST: Config = Config {
    delay: Duration::from_millis(150),
    strategy: Strategy::Push,
    on_finish: &|termination: Termination| log::info!("typewriter {}", termination),
    ..Config::const_default()
};

static IN_PLACE: Config = Config {
    delay: Duration::from_millis(100),
    theme: &InPlaceTheme,
    width: Some(24),
    ..Config::const_default()
};

#[tokio::main]
async fn main() -> Result<(), RenderError> {
    env_logger::init();

    // Replace global default config.
    set_global_config(&FAST);
    "Hello, world!"
        .typewriter()
        .stream()
        .type_out(std::io::stdout())
        .await?;

    // Replace config only for this instance, and cut it short.
    let typewriter = "The quick brown fox jumps over the lazy dog".typewriter().config(&IN_PLACE);
    let stream = typewriter.stream();
    let canceller = stream.canceller();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let termination = stream.type_out(std::io::stderr()).await?;
    println!("stopped: {}", termination);

    Ok(())
}
