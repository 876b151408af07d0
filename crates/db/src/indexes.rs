use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

use crate::models::Task;

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Tasks
    create_indexes(
        db,
        Task::COLLECTION,
        vec![
            index_unique(bson::doc! { "task_id": 1 }),
            // stale PROCESSING sweep
            index(bson::doc! { "status": 1, "create_time": 1 }),
            // retention sweep
            index(bson::doc! { "deleted": 1, "finish_time": 1 }),
        ],
    )
    .await?;

    info!("All MongoDB indexes ensured");
    Ok(())
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    let coll = db.collection::<bson::Document>(collection);
    coll.create_indexes(indexes).await?;
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}
