use aces::config::Config;
use aces::evolution::{save_results, CoevolutionEngine};
use aces::network::topology::TopologyBuilder;
use colored::*;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct HofRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Kill Chain")]
    kill_chain: String,
    #[tabled(rename = "Effectiveness")]
    effectiveness: String,
    #[tabled(rename = "Stealth")]
    stealth: String,
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    println!("{}", "=".repeat(78).bright_blue());
    println!("{}", "    ACES - ADVERSARIAL CO-EVOLUTION SIMULATOR".bright_white().bold());
    println!("{}", "    Attacker kill chains vs detection rule sets".bright_cyan());
    println!("{}", "=".repeat(78).bright_blue());

    let config = Config {
        population_size: 30,
        num_generations: 40,
        matchups_per_eval: 4,
        ..Config::default()
    };

    println!("\n{}", "Configuration:".bright_white().bold());
    println!("   Population: {}", config.population_size);
    println!("   Generations: {}", config.num_generations);
    println!("   Matchups per eval: {}", config.matchups_per_eval);
    println!("   Defender budget: {}", config.defender_budget);
    println!("   Seed: {}", config.seed);

    let network = TopologyBuilder::corporate_medium();
    println!("\n{}", "Network:".bright_white().bold());
    println!("   Hosts: {}", network.host_count());
    println!("   Edges: {}", network.edge_count());
    for (segment, members) in network.segments() {
        println!("   {:>12}: {} hosts", segment, members.len());
    }

    let output_dir = config.output_dir.clone();
    let mut engine = CoevolutionEngine::new(config, network).expect("valid default config");
    let result = engine.run().expect("co-evolution run");

    let last = result.history.last().expect("at least one generation");
    println!("\n{}", "Final generation:".bright_white().bold());
    println!(
        "   Attacker effectiveness: mean {:.1}, max {}",
        last.attacker_effectiveness.mean,
        format!("{:.1}", last.attacker_effectiveness.max).red().bold()
    );
    println!(
        "   Defender coverage:      mean {:.1}, max {}",
        last.defender_coverage.mean,
        format!("{:.1}", last.defender_coverage.max).blue().bold()
    );
    println!("   Unique kill chains: {}", last.unique_kill_chains);
    println!("   Attacker diversity: {:.3}", last.attacker_diversity);

    let rows: Vec<HofRow> = result
        .attacker_hof
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, entry)| HofRow {
            rank: i + 1,
            kill_chain: entry.kill_chain.join(" -> "),
            effectiveness: format!("{:.1}", entry.fitness[0]),
            stealth: format!("{:.2}", entry.fitness[1]),
        })
        .collect();
    println!("\n{}", "Top attacker kill chains:".bright_white().bold());
    println!("{}", Table::new(rows));

    let saved = save_results(&result, &output_dir).expect("write results");
    println!("\nResults written to {}", saved.display().to_string().green());
}
