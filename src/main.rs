use log::info;
use std::fs;

use hornet::{run_opf, ElementKind, Network, SolveOptions};

fn main() {
    // establish log file as log.log
    let log_file = fs::File::create("log.log").expect("Could not create log file");

    // establish logger, default level debug, push output to log.log, initialize
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    info!("Beginning run...");

    let net = two_bus_case();
    println!("{net}");

    match run_opf(&net, &SolveOptions::default()) {
        Ok(solution) => println!("{solution}"),
        Err(err) => eprintln!("model error: {err}"),
    }
}

/// Slack at bus 0, a dispatchable generator and a 20 MW load at bus 1,
/// linear generation cost.
fn two_bus_case() -> Network {
    let mut net = Network::new("two bus demo".to_string(), 100.0, 50.0);
    let slack_bus = net.add_bus("slack", 110.0, 0.95, 1.05);
    let gen_bus = net.add_bus("plant", 110.0, 0.95, 1.05);
    net.add_line(slack_bus, gen_bus, 0.01, 0.05, 0.0);
    net.add_ext_grid(slack_bus);
    let generator = net.add_generator(gen_bus, (5.0, 150.0), (-50.0, 50.0));
    net.add_load(gen_bus, 20.0, 0.0);
    net.add_poly_cost(ElementKind::Gen, generator, vec![0.0, 1.0], vec![]);
    net
}
