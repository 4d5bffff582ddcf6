use aces::config::Config;
use aces::evolution::CoevolutionEngine;
use aces::network::topology::TopologyBuilder;
use colored::*;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    println!("{}", "ACES arms race: streaming metrics demo".bright_white().bold());

    let config = Config {
        population_size: 20,
        num_generations: 30,
        matchups_per_eval: 3,
        stagnation_window: 8,
        ..Config::default()
    };

    let network = TopologyBuilder::corporate_medium();
    let mut engine = CoevolutionEngine::new(config, network).expect("valid config");
    let subscriber = engine.subscribe_metrics();

    let result = engine.run().expect("co-evolution run");

    // Consume whatever survived the drop-oldest queue.
    for m in subscriber.drain() {
        let trend = if m.attacker_effectiveness.max >= m.defender_coverage.max {
            "attacker ahead".red()
        } else {
            "defender ahead".blue()
        };
        println!(
            "gen {:>3} | atk eff {:>7.1} stl {:.2} | def cov {:>6.1} eff {:.2} | {}",
            m.generation,
            m.attacker_effectiveness.max,
            m.attacker_stealth.mean,
            m.defender_coverage.max,
            m.defender_efficiency.mean,
            trend,
        );
    }

    println!(
        "\n{} generations, {} hall-of-fame attackers, {} defenders",
        result.generations_completed,
        result.attacker_hof.len(),
        result.defender_hof.len()
    );
}
