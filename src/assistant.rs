//! Vector store loading and assistant registration.

use std::path::Path;

use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::client::OpenAIClient;
use crate::config::PollSettings;
use crate::error::{Error, Result};
use crate::tools::assistant_tools;

pub const VECTOR_STORE_NAME: &str = "DB data";
pub const ASSISTANT_NAME: &str = "Comparison Assistant";

pub const INSTRUCTIONS: &str = r#"You are an assistant for a production site that uses machines to manufacture products. User can ask questions about the site, machines, and KPIs. Also the user can ask to compute KPIs for some machines.
In those situations, i.e. when the user asks about KPIs' computation and/or comparison, you should:
1. Use the `file_search` tool to retrieve the machine IDs for the listed machines.
2. Use the `file_search` tool to retrieve the KPI IDs for the listed KPIs.
3. Use the `compute_kpi_by_machine_id` function using the machines and KPIs' IDs retrieved in the previous steps.
4. Present the comparison in a clear and concise manner.
If the user asks for something out of your knowledge, let them know that you can't help with that, and ask for another request, specifying what you can do.

You can also be asked to answer questions about cost prediction (eur/kwh) for a category of machines, utilization rate and energy efficiency rate (in terms of percentage) for a specific machine. In those cases, you should:
1. Use the `file_search` tool to retrieve the data for a specific machine or category.
2. Inform the user with the data retrieved.

You also must be able to create new KPIs that have to make sense. This can be requested by the user in form of a suggestion (e.g. "Can you suggest a KPI for machine X?"), as well as a more direct command (e.g. "Create a new KPI that represents cost per cycle"). Keep in mind that you have to give a resulting formula to compute the proposed KPI, and it must use the available ones. The formulas should be usable by an automated system that can query a dataset (e.g. "cost per cycle" will translate to cost / cycles). When suggesting new KPIs keep it simple, don't make huge KPIs that are hard to understand or compute.
So, this is the process you must follow:
1. Use the `file_search` tool to retrieve the KPIs available in the system.
2. Use the retrieved KPIs to suggest a new KPI. You can use only the available KPIs to create the new one, using exactly their names (in the same format) and the arithmetic operations `+`, `-`, `*`, `/`, `**`, `//`, `%`.
3. Present the new KPI in a clear and concise manner."#;

/// Upload `file_path` into a fresh vector store and wait until it is indexed.
///
/// Returns the vector store ID.
pub async fn load_vector_store(
    client: &OpenAIClient,
    file_path: &Path,
    poll: PollSettings,
) -> Result<String> {
    let vector_store = client.create_vector_store(VECTOR_STORE_NAME).await?;
    let file_id = client.upload_document(file_path).await?;
    let mut batch = client
        .create_file_batch(&vector_store.id, &[file_id])
        .await?;

    let started = Instant::now();
    while batch.is_pending() {
        if started.elapsed() >= poll.max_wait {
            return Err(Error::Timeout {
                what: format!("file batch {}", batch.id),
                waited: started.elapsed(),
            });
        }
        sleep(poll.interval).await;
        batch = client
            .retrieve_file_batch(&vector_store.id, &batch.id)
            .await?;
    }

    debug!(
        name: "vector_store.batch",
        batch_id = %batch.id,
        status = %batch.status,
        file_counts = ?batch.file_counts,
        "File batch finished"
    );

    if batch.status != "completed" {
        return Err(Error::IndexingFailed {
            batch_id: batch.id,
            status: batch.status,
        });
    }

    info!(
        name: "vector_store.ready",
        vector_store_id = %vector_store.id,
        file = %file_path.display(),
        "Vector store ready"
    );
    Ok(vector_store.id)
}

/// Create the KPI assistant and link it to `vector_store_id`.
///
/// Returns the assistant ID.
pub async fn register_assistant(
    client: &OpenAIClient,
    model: &str,
    vector_store_id: &str,
) -> Result<String> {
    let assistant = client
        .create_assistant(json!({
            "name": ASSISTANT_NAME,
            "instructions": INSTRUCTIONS,
            "model": model,
            "tools": assistant_tools(),
        }))
        .await?;

    let assistant = client
        .link_vector_stores(&assistant.id, &[vector_store_id.to_string()])
        .await?;

    info!(
        name: "assistant.registered",
        assistant_id = %assistant.id,
        assistant_name = assistant.name.as_deref().unwrap_or(ASSISTANT_NAME),
        model = assistant.model.as_deref().unwrap_or(model),
        "Assistant registered"
    );
    Ok(assistant.id)
}
