//! The vigil monitoring controller

use clap::Parser;

mod args;
mod libs;

use libs::Controller;

#[tokio::main]
async fn main() {
    // install a crypto provider for rustls
    // Rustls will complain if this is not run but we can ignore any errors
    // https://github.com/rustls/rustls/issues/1938
    let _ = rustls::crypto::ring::default_provider().install_default();
    // load command line args
    let args = args::Args::parse();
    // try to load a config file
    let conf = vigil::Conf::new(&args.config).expect("Failed to load config");
    // setup our tracer
    vigil::utils::trace::setup("VigilController", &conf.tracing);
    // build our controller
    let controller = Controller::new(conf)
        .await
        .expect("Controller failed to initialize");
    // reconcile checks until the stream dies or we are signalled
    controller.run().await.expect("Controller crashed");
}
