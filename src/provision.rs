//! Destination index provisioning.

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::sink::{AttributeKind, IndexHandle, SearchSink};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Prepare the destination index of `index` and return a handle to it.
///
/// With `drop` the index is deleted (a missing index is fine) and recreated
/// with the configured primary key. Without it, a missing index is created.
/// Filterable, sortable and searchable attributes are then replaced, in that
/// order, when `force_meta` is set or the index holds no documents. Every
/// task enqueued here is awaited before returning, so no batch is ever
/// submitted ahead of the settings.
#[instrument(skip(index, sink), fields(index = %index.destination))]
pub async fn provision(
    index: &IndexConfig,
    drop: bool,
    force_meta: bool,
    sink: Arc<dyn SearchSink>,
) -> Result<IndexHandle> {
    prepare(index, drop, force_meta, sink.as_ref())
        .await
        .map_err(|e| Error::provision(&index.destination, e))?;

    Ok(IndexHandle::new(sink, &index.destination, &index.document_key()))
}

async fn prepare(
    index: &IndexConfig,
    drop: bool,
    force_meta: bool,
    sink: &dyn SearchSink,
) -> Result<()> {
    let uid = index.destination.as_str();
    let primary_key = index.document_key();

    if drop {
        delete_if_exists(sink, uid).await?;
        create(sink, uid, &primary_key).await?;
    } else if !sink.index_exists(uid).await? {
        info!(index = uid, "Index does not exist yet");
        create(sink, uid, &primary_key).await?;
    }

    let documents = sink.document_count(uid).await?;
    if !force_meta && documents > 0 {
        debug!(index = uid, documents, "Index already populated, keeping metadata");
        return Ok(());
    }

    let attributes = [
        (AttributeKind::Filterable, &index.filterable),
        (AttributeKind::Sortable, &index.sortable),
        (AttributeKind::Searchable, &index.searchable),
    ];
    for (kind, names) in attributes {
        let task = sink.update_attributes(uid, kind, names).await?;
        sink.wait_for_task(&task).await?;
        debug!(index = uid, kind = %kind, ?names, "Updated attributes");
    }

    info!(index = uid, "Updated index metadata");
    Ok(())
}

async fn delete_if_exists(sink: &dyn SearchSink, uid: &str) -> Result<()> {
    let outcome = match sink.delete_index(uid).await {
        Ok(task) => sink.wait_for_task(&task).await.map(|_| ()),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            info!(index = uid, "Deleted index");
            Ok(())
        }
        Err(e) if e.is_index_not_found() => {
            debug!(index = uid, "Index did not exist, nothing to delete");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn create(sink: &dyn SearchSink, uid: &str, primary_key: &str) -> Result<()> {
    let outcome = match sink.create_index(uid, primary_key).await {
        Ok(task) => sink.wait_for_task(&task).await.map(|_| ()),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            info!(index = uid, primary_key, "Created index");
            Ok(())
        }
        Err(e) if e.is_index_already_exists() => {
            debug!(index = uid, "Index was created concurrently");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
