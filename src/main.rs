use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};

use kvnode::client_handler::ClientHandler;
use kvnode::redis::{follower_handshake, Redis, RedisConfig};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = RedisConfig::from_args(std::env::args());
    info!("starting on port {} (dir={}, dbfilename={})", config.port, config.dir, config.dbfilename);

    let ctx = Arc::new(Redis::new(config));
    ctx.load_snapshot();

    if ctx.config.is_replica() {
        let replica_ctx = Arc::clone(&ctx);
        std::thread::spawn(move || follower_handshake::run(replica_ctx));
    }

    let addr = format!("{}:{}", ctx.config.addr, ctx.config.port);
    let listener = TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handler = ClientHandler::new(stream, Arc::clone(&ctx));
                handler.spawn();
            }
            Err(e) => {
                error!("error accepting connection: {}", e);
            }
        }
    }

    Ok(())
}
