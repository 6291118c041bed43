#![allow(clippy::print_stdout, clippy::print_stderr)]
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueHint};
use diomede::model::{Quad, QuadPattern, Term};
use diomede::storage::plan::Permutation;
use diomede::store::{CharacteristicDataSet, Store};
use diomede::DbConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Graph term standing in for the default graph of an N-Quads file.
const DEFAULT_GRAPH_IRI: &str = "tag:default-graph";

#[derive(Parser)]
#[command(about, version, name = "diomede")]
/// Diomede quadstore command line toolkit.
struct Args {
    /// Directory of the store environment.
    #[arg(short, long, global = true, value_hint = ValueHint::DirPath)]
    location: Option<PathBuf>,
    /// Maximum size of the memory map in bytes.
    #[arg(long, global = true)]
    map_size: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates an empty store.
    Create,
    /// Prints the metadata table and row counts.
    Stats,
    /// Dumps the id-to-term dictionary.
    Terms,
    /// Dumps the hash-to-id dictionary.
    Hashes,
    /// Dumps every quad.
    Quads,
    /// Dumps the triples of one graph.
    Triples {
        /// The graph IRI.
        graph: String,
    },
    /// Lists the graph terms.
    Graphs,
    /// Lists the terms appearing in one graph.
    Graphterms {
        /// The graph IRI.
        graph: String,
    },
    /// Lists the active permutation indexes.
    Indexes,
    /// Builds an index: a spog permutation, `cs`, or `ts`.
    Addindex {
        /// Permutation name, `cs` (Characteristic Sets) or `ts` (Type Sets).
        name: String,
    },
    /// Drops an index: a spog permutation, `cs`, or `ts`.
    Dropindex {
        /// Permutation name, `cs` or `ts`.
        name: String,
    },
    /// Prints the best index for a set of bound positions.
    Bestindex {
        /// Bound positions, each one of `s`, `p`, `o`, `g`.
        #[arg(required = true)]
        positions: Vec<String>,
    },
    /// Runs the integrity scan.
    Verify,
    /// Lists prefixes; `clear` removes all; `<label> <iri>` sets one.
    Prefix {
        args: Vec<String>,
    },
    /// Prints the Characteristic Sets of one graph, or of every graph.
    Cs {
        /// The graph IRI.
        graph: Option<String>,
    },
    /// Prints the Type Sets of one graph, or of every graph.
    Ts {
        /// The graph IRI.
        graph: Option<String>,
    },
    /// Prints the cardinality of a predicate in a graph.
    PredCard {
        /// The graph IRI.
        graph: String,
        /// The predicate IRI.
        predicate: String,
    },
    /// Loads an N-Quads or N-Triples file.
    Load {
        /// The file to ingest.
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    /// A spog permutation name (e.g. `gpso`) dumps every quad in that key
    /// order.
    #[command(external_subcommand)]
    Dump(Vec<String>),
}

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let location = args
        .location
        .clone()
        .context("--location <DIR> is required")?;
    let mut config = DbConfig::default();
    if let Some(map_size) = args.map_size {
        config.map_size = map_size;
    }
    match args.command {
        Command::Create => {
            let _store = Store::open_with(&location, &config, true)?;
            println!("created {}", location.display());
        }
        Command::Stats => {
            let store = open(&location, &config)?;
            for (key, value) in store.stats_entries()? {
                println!("{key}: {value}");
            }
            println!("quads: {}", store.len()?);
            println!("terms: {}", store.term_count()?);
            println!("graphs: {}", store.graphs()?.len());
        }
        Command::Terms => {
            let store = open(&location, &config)?;
            for (id, term) in store.terms()? {
                println!("{id}\t{term}");
            }
        }
        Command::Hashes => {
            let store = open(&location, &config)?;
            for (hash, id) in store.term_hashes()? {
                println!("{}\t{id}", hex::encode(hash));
            }
        }
        Command::Quads => {
            let store = open(&location, &config)?;
            for quad in store.quads_for_pattern(&QuadPattern::all())? {
                println!("{}", quad?);
            }
        }
        Command::Triples { graph } => {
            let store = open(&location, &config)?;
            let pattern = graph_pattern(&graph);
            for quad in store.quads_for_pattern(&pattern)? {
                let quad = quad?;
                println!("{} {} {} .", quad.subject, quad.predicate, quad.object);
            }
        }
        Command::Graphs => {
            let store = open(&location, &config)?;
            for graph in store.graphs()? {
                println!("{graph}");
            }
        }
        Command::Graphterms { graph } => {
            let store = open(&location, &config)?;
            for term in store.graph_terms(&Term::iri(graph))? {
                println!("{term}");
            }
        }
        Command::Indexes => {
            let store = open(&location, &config)?;
            for name in store.full_indexes() {
                println!("{name}");
            }
        }
        Command::Addindex { name } => {
            let store = open(&location, &config)?;
            match name.as_str() {
                "cs" => store.compute_characteristic_sets(false)?,
                "ts" => store.compute_characteristic_sets(true)?,
                name => store.add_full_index(name)?,
            }
        }
        Command::Dropindex { name } => {
            let store = open(&location, &config)?;
            match name.as_str() {
                "cs" => store.drop_characteristic_sets()?,
                "ts" => store.drop_type_sets()?,
                name => store.drop_full_index(name)?,
            }
        }
        Command::Bestindex { positions } => {
            let store = open(&location, &config)?;
            let mut bound = [false; 4];
            for position in &positions {
                let slot = match position.as_str() {
                    "s" => 0,
                    "p" => 1,
                    "o" => 2,
                    "g" => 3,
                    other => bail!("{other} is not one of s, p, o, g"),
                };
                bound[slot] = true;
            }
            match store.best_index_name(bound) {
                Some(name) => println!("{name}"),
                None => println!("none"),
            }
        }
        Command::Verify => {
            let store = open(&location, &config)?;
            store.verify()?;
            println!("ok");
        }
        Command::Prefix { args } => {
            let store = open(&location, &config)?;
            match args.as_slice() {
                [] => {
                    for (label, iri) in store.prefixes()? {
                        println!("{label}: {iri}");
                    }
                }
                [keyword] if keyword == "clear" => store.clear_prefixes()?,
                [label, iri] => store.set_prefix(label, iri)?,
                _ => bail!("usage: prefix [clear | <label> <iri>]"),
            }
        }
        Command::Cs { graph } => {
            let store = open(&location, &config)?;
            for graph in graph_selection(&store, graph)? {
                let dataset = store.characteristic_sets(&graph, false)?;
                print_characteristic_sets(&store, &dataset)?;
            }
        }
        Command::Ts { graph } => {
            let store = open(&location, &config)?;
            for graph in graph_selection(&store, graph)? {
                let dataset = store.characteristic_sets(&graph, true)?;
                print_type_sets(&store, &dataset)?;
            }
        }
        Command::PredCard { graph, predicate } => {
            let store = open(&location, &config)?;
            let cardinality =
                store.predicate_cardinality(&Term::iri(graph), &Term::iri(predicate))?;
            println!("{cardinality}");
        }
        Command::Load { file } => {
            let store = open(&location, &config)?;
            let version = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system clock before the epoch")?
                .as_secs();
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("cannot open {}", file.display()))?,
            );
            let quads = oxttl::NQuadsParser::new()
                .for_reader(reader)
                .filter_map(|parsed| match parsed {
                    Ok(quad) => Some(convert_quad(quad)),
                    Err(error) => {
                        eprintln!("skipping malformed line: {error}");
                        None
                    }
                });
            let inserted = store.load_with_progress(version, quads, &mut |count, rate| {
                eprintln!("{count} quads read ({rate:.0}/s)");
            })?;
            println!("inserted {inserted} quads");
        }
        Command::Dump(dump_args) => {
            let (name, rest) = dump_args
                .split_first()
                .context("missing permutation name")?;
            if Permutation::from_name(name).is_none() {
                bail!("{name} is not a diomede command or spog permutation");
            }
            if !rest.is_empty() {
                bail!("{name} takes no arguments");
            }
            let store = open(&location, &config)?;
            for quad in store.quads_ordered(&QuadPattern::all(), name)? {
                println!("{}", quad?);
            }
        }
    }
    Ok(())
}

fn open(location: &Path, config: &DbConfig) -> anyhow::Result<Store> {
    Store::open_with(location, config, false)?
        .with_context(|| format!("no store at {}", location.display()))
}

/// Every position left variable except the graph.
fn graph_pattern(graph: &str) -> QuadPattern {
    QuadPattern::new(
        diomede::TermPattern::variable("s"),
        diomede::TermPattern::variable("p"),
        diomede::TermPattern::variable("o"),
        Term::iri(graph),
    )
}

fn graph_selection(store: &Store, graph: Option<String>) -> anyhow::Result<Vec<Term>> {
    Ok(match graph {
        Some(graph) => vec![Term::iri(graph)],
        None => store.graphs()?,
    })
}

fn render_term(store: &Store, id: u64) -> anyhow::Result<String> {
    Ok(match store.id_term(id)? {
        Some(term) => term.to_string(),
        None => format!("#{id}"),
    })
}

fn print_characteristic_sets(
    store: &Store,
    dataset: &CharacteristicDataSet,
) -> anyhow::Result<()> {
    let staleness = if dataset.accurate { "" } else { " (stale)" };
    println!("# graph {}{staleness}", dataset.graph);
    for set in &dataset.sets {
        let mut predicates = Vec::with_capacity(set.predicates.len());
        for stat in &set.predicates {
            predicates.push(format!(
                "{} sum={} min={} max={}",
                render_term(store, stat.predicate)?,
                stat.sum,
                stat.min,
                stat.max
            ));
        }
        println!("count={}\t{}", set.count, predicates.join("; "));
    }
    Ok(())
}

fn print_type_sets(store: &Store, dataset: &CharacteristicDataSet) -> anyhow::Result<()> {
    let staleness = if dataset.accurate { "" } else { " (stale)" };
    println!("# graph {}{staleness}", dataset.graph);
    for (set, combos) in dataset.sets.iter().zip(&dataset.type_sets) {
        println!("characteristic set of {} subjects:", set.count);
        for combo in combos {
            let mut types = Vec::with_capacity(combo.types.len());
            for &type_id in &combo.types {
                types.push(render_term(store, type_id)?);
            }
            println!("  count={}\t{}", combo.count, types.join(", "));
        }
    }
    Ok(())
}

fn convert_quad(quad: oxrdf::Quad) -> Quad {
    Quad::new(
        convert_subject(quad.subject),
        Term::Iri(quad.predicate.into_string()),
        convert_term(quad.object),
        convert_graph(quad.graph_name),
    )
}

fn convert_subject(subject: oxrdf::Subject) -> Term {
    match subject {
        oxrdf::Subject::NamedNode(node) => Term::Iri(node.into_string()),
        oxrdf::Subject::BlankNode(node) => Term::Blank(node.into_string()),
    }
}

fn convert_term(term: oxrdf::Term) -> Term {
    match term {
        oxrdf::Term::NamedNode(node) => Term::Iri(node.into_string()),
        oxrdf::Term::BlankNode(node) => Term::Blank(node.into_string()),
        oxrdf::Term::Literal(literal) => convert_literal(literal),
    }
}

fn convert_literal(literal: oxrdf::Literal) -> Term {
    use oxrdf::vocab::xsd;
    let (value, datatype, language) = literal.destruct();
    if let Some(language) = language {
        return Term::LanguageLiteral { value, language };
    }
    match datatype {
        None => Term::StringLiteral(value),
        Some(datatype) if datatype == xsd::INTEGER => match value.parse() {
            Ok(parsed) => Term::IntegerLiteral(parsed),
            Err(_) => Term::DatatypeLiteral {
                value,
                datatype: datatype.into_string(),
            },
        },
        Some(datatype) if datatype == xsd::STRING => Term::StringLiteral(value),
        Some(datatype) => Term::DatatypeLiteral {
            value,
            datatype: datatype.into_string(),
        },
    }
}

fn convert_graph(graph: oxrdf::GraphName) -> Term {
    match graph {
        oxrdf::GraphName::NamedNode(node) => Term::Iri(node.into_string()),
        oxrdf::GraphName::BlankNode(node) => Term::Blank(node.into_string()),
        oxrdf::GraphName::DefaultGraph => Term::iri(DEFAULT_GRAPH_IRI),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic_in_result_fn)]

    use anyhow::Result;
    use assert_cmd::Command;
    use assert_fs::prelude::*;
    use assert_fs::{NamedTempFile, TempDir};
    use predicates::prelude::*;

    const DATA: &str = r#"<http://example.org/s> <http://example.org/p> "o" <http://example.org/g> .
<http://example.org/s> <http://example.org/p2> "7"^^<http://www.w3.org/2001/XMLSchema#integer> <http://example.org/g> .
<http://example.org/s> <http://example.org/p> "o" .
"#;

    fn cli_command() -> Result<Command> {
        Ok(Command::cargo_bin("diomede")?)
    }

    fn initialized_cli_store() -> Result<TempDir> {
        let store_dir = TempDir::new()?;
        let data = NamedTempFile::new("data.nq")?;
        data.write_str(DATA)?;
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("create")
            .assert()
            .success();
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("load")
            .arg(data.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("inserted 3 quads"));
        Ok(store_dir)
    }

    #[test]
    fn cli_help() -> Result<()> {
        cli_command()?
            .assert()
            .failure()
            .stderr(predicate::str::contains("Usage"));
        Ok(())
    }

    #[test]
    fn cli_load_stats_and_verify() -> Result<()> {
        let store_dir = initialized_cli_store()?;
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("stats")
            .assert()
            .success()
            .stdout(predicate::str::contains("quads: 3"))
            .stdout(predicate::str::contains("Diomede-Version"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("verify")
            .assert()
            .success()
            .stdout(predicate::str::contains("ok"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("quads")
            .assert()
            .success()
            .stdout(predicate::str::contains("<http://example.org/p2>"));
        Ok(())
    }

    #[test]
    fn cli_index_management_and_dump() -> Result<()> {
        let store_dir = initialized_cli_store()?;
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("addindex")
            .arg("spog")
            .assert()
            .success();
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("indexes")
            .assert()
            .success()
            .stdout(predicate::str::contains("gpso"))
            .stdout(predicate::str::contains("spog"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("bestindex")
            .arg("s")
            .assert()
            .success()
            .stdout(predicate::str::contains("spog"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("spog")
            .assert()
            .success()
            .stdout(predicate::str::contains("<http://example.org/s>"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("nope")
            .assert()
            .failure();
        Ok(())
    }

    #[test]
    fn cli_characteristic_sets_and_prefixes() -> Result<()> {
        let store_dir = initialized_cli_store()?;
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("addindex")
            .arg("cs")
            .assert()
            .success();
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("cs")
            .arg("http://example.org/g")
            .assert()
            .success()
            .stdout(predicate::str::contains("count=1"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("pred-card")
            .arg("http://example.org/g")
            .arg("http://example.org/p")
            .assert()
            .success()
            .stdout(predicate::str::contains("1"));
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("prefix")
            .arg("ex")
            .arg("http://example.org/")
            .assert()
            .success();
        cli_command()?
            .arg("--location")
            .arg(store_dir.path())
            .arg("prefix")
            .assert()
            .success()
            .stdout(predicate::str::contains("ex: http://example.org/"));
        Ok(())
    }
}
