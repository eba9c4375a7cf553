//! Order command - print tables in foreign-key insertion order.

use anyhow::Context;
use db_subsetter::schema::SchemaGraph;
use db_subsetter::store::open_store;
use db_subsetter::subset::SubsetYamlConfig;
use std::path::Path;

/// Run the order command
pub fn run(
    source: &str,
    reverse: bool,
    levels: bool,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(source).with_context(|| format!("opening {}", source))?;
    let mut schema = store
        .introspect()
        .with_context(|| format!("reading schema of {}", store.describe()))?;
    if let Some(path) = config {
        SubsetYamlConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?
            .apply_foreign_keys(&mut schema)?;
    }

    if schema.is_empty() {
        eprintln!("No tables found in {}.", store.describe());
        return Ok(());
    }

    let graph = SchemaGraph::build(schema)?;

    if levels {
        let mut groups = graph.levels();
        if reverse {
            groups.reverse();
        }
        for (depth, group) in groups.iter().enumerate() {
            let names: Vec<&str> = group.iter().filter_map(|&id| graph.table_name(id)).collect();
            println!("{}: {}", depth, names.join(", "));
        }
        return Ok(());
    }

    let mut ordered: Vec<&str> = graph
        .insertion_order()
        .iter()
        .filter_map(|&id| graph.table_name(id))
        .collect();
    if reverse {
        ordered.reverse();
    }
    for name in ordered {
        println!("{}", name);
    }

    Ok(())
}
