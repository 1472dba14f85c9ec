use loam_core::models::Collection;

use crate::cli::RecordCommands;
use crate::error::CliError;

use super::common::{
    format_record_lines, parse_fields, print_json, record_to_list_item, short_id, Engine,
};

pub async fn run_records(
    collection: Collection,
    command: RecordCommands,
    engine: &Engine,
) -> Result<(), CliError> {
    match command {
        RecordCommands::Add { id, fields } => {
            let payload = parse_fields(&fields)?;
            let local_id = match id.as_deref() {
                Some(query) => Some(engine.resolve_record(collection, query).await?.local_id),
                None => None,
            };
            let record = engine
                .sync
                .cache_record(collection, local_id.as_deref(), payload)
                .await?;
            println!(
                "{} {} {}",
                if local_id.is_some() { "Updated" } else { "Created" },
                collection.entity_type(),
                record.local_id
            );
        }
        RecordCommands::List { limit, json } => {
            let mut records = engine.sync.list_cached(collection).await?;
            records.truncate(limit);
            if json {
                let items = records.iter().map(record_to_list_item).collect::<Vec<_>>();
                print_json(&items)?;
            } else if records.is_empty() {
                println!("No {collection} cached.");
            } else {
                for line in format_record_lines(&records) {
                    println!("{line}");
                }
            }
        }
        RecordCommands::Delete { id } => {
            let record = engine.resolve_record(collection, &id).await?;
            engine
                .sync
                .delete_cached(collection, &record.local_id)
                .await?;
            println!(
                "Deleted {} {}",
                collection.entity_type(),
                short_id(&record.local_id)
            );
        }
    }
    Ok(())
}
