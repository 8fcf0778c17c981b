use typewriter::prelude::*;

#[tokio::main]
async fn main() {
    env_logger::init();

    let typewriter = "Hello, world!".typewriter();

    let mut push = typewriter.strategy(Strategy::Push).stream();
    while let Some(item) = push.next().await {
        println!("{}", item);
    }
    println!("Push stream done");

    // Same phrase, produced on demand this time.
    let typewriter = "Hello, world!".typewriter().strategy(Strategy::Pull);
    let mut pull = typewriter.stream();
    while let Some(item) = pull.next().await {
        println!("{}", item);
    }
    println!("Pull stream done");
}
