// docstore-cli/src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docstore_core::{
    init_logging, CreateCollectionOptions, Database, DocStoreError, IndexOptions, LogLevel,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_DB: &str = "docstore.json";

#[derive(Parser)]
#[command(name = "docstore")]
#[command(about = "docstore CLI - command-line interface for the docstore document database")]
#[command(version)]
struct Cli {
    /// Log level when DOCSTORE_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import data from JSON file into database
    Import {
        /// JSON file to import: {"collection": [documents...], ...}
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
    },
    /// Export database to JSON file
    Export {
        /// Output JSON file
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        /// Export only specific collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// Query a collection and print matching documents
    Find {
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        #[arg(long)]
        collection: String,
        /// Filter document (JSON)
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Projection document (JSON)
        #[arg(long)]
        projection: Option<String>,
    },
    /// Run an aggregation pipeline and print the results
    Aggregate {
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        #[arg(long)]
        collection: String,
        /// Pipeline (JSON array of stages)
        #[arg(long)]
        pipeline: String,
    },
    /// Schema management commands
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Run the university walkthrough against an in-memory store
    Demo,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Load schema from JSON file or directory (modular)
    Load {
        /// Schema file (.json) or directory containing *.schema.json files
        path: PathBuf,
        /// Database file path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        /// Collection name (required for single file, ignored for directory)
        #[arg(long)]
        collection: Option<String>,
    },
    /// Save schema to JSON file or directory
    Save {
        /// Output file (.json) or directory
        path: PathBuf,
        /// Database file path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        /// Collection name (for single file export)
        #[arg(long)]
        collection: Option<String>,
        /// Export all schemas (for directory export)
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::from_str(&cli.log_level)
        .with_context(|| format!("Unknown log level: {}", cli.log_level))?;
    init_logging(level);

    match cli.command {
        Commands::Import { file, db } => import_data(&file, &db),
        Commands::Export {
            file,
            db,
            collection,
        } => export_data(&file, &db, collection.as_deref()),
        Commands::Find {
            db,
            collection,
            filter,
            projection,
        } => find_documents(&db, &collection, &filter, projection.as_deref()),
        Commands::Aggregate {
            db,
            collection,
            pipeline,
        } => run_aggregation(&db, &collection, &pipeline),
        Commands::Schema { action } => match action {
            SchemaAction::Load {
                path,
                db,
                collection,
            } => load_schema(&path, &db, collection.as_deref()),
            SchemaAction::Save {
                path,
                db,
                collection,
                all,
            } => save_schema(&path, &db, collection.as_deref(), all),
        },
        Commands::Demo => run_demo(),
    }
}

fn open_db(db_path: &Path) -> Result<Database> {
    Database::open(db_path).with_context(|| format!("Failed to open database: {}", db_path.display()))
}

fn parse_json(label: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON in {}: {}", label, text))
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).with_context(|| "Failed to serialize to JSON")?
    );
    Ok(())
}

/// Import data from JSON file
/// Format: { "collection_name": [documents...], ... }
fn import_data(file: &Path, db_path: &Path) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let data: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", file.display()))?;

    let db = open_db(db_path)?;

    let mut total_docs = 0;

    for (collection_name, documents) in data {
        let Value::Array(docs) = documents else {
            anyhow::bail!("Collection '{}' must be an array", collection_name);
        };

        let result = db
            .collection(&collection_name)
            .insert_many(docs)
            .with_context(|| format!("Failed to insert documents into {}", collection_name))?;

        println!(
            "Imported {} documents into '{}'",
            result.inserted_count, collection_name
        );
        total_docs += result.inserted_count;
    }

    println!(
        "Total: {} documents imported to {}",
        total_docs,
        db_path.display()
    );
    Ok(())
}

/// Export database to JSON file
fn export_data(file: &Path, db_path: &Path, collection_filter: Option<&str>) -> Result<()> {
    let db = open_db(db_path)?;

    let mut output: Map<String, Value> = Map::new();
    let mut total_docs = 0;

    for coll_name in db.list_collections() {
        if collection_filter.is_some_and(|filter| filter != coll_name) {
            continue;
        }

        let docs = db.collection(&coll_name).snapshot();

        println!("Exporting {} documents from '{}'", docs.len(), coll_name);
        total_docs += docs.len();
        output.insert(coll_name, Value::Array(docs));
    }

    let json =
        serde_json::to_string_pretty(&output).with_context(|| "Failed to serialize to JSON")?;

    fs::write(file, json)
        .with_context(|| format!("Failed to write to file: {}", file.display()))?;

    println!(
        "Total: {} documents exported to {}",
        total_docs,
        file.display()
    );
    Ok(())
}

fn find_documents(db_path: &Path, collection: &str, filter: &str, projection: Option<&str>) -> Result<()> {
    let db = open_db(db_path)?;
    let filter = parse_json("filter", filter)?;
    let projection = projection
        .map(|text| parse_json("projection", text))
        .transpose()?;

    let cursor = db
        .collection(collection)
        .find(&filter, projection.as_ref())
        .with_context(|| format!("Failed to query collection: {}", collection))?;

    let mut count = 0;
    for doc in cursor {
        print_json(&doc)?;
        count += 1;
    }
    debug!(collection, count, "find finished");
    Ok(())
}

fn run_aggregation(db_path: &Path, collection: &str, pipeline: &str) -> Result<()> {
    let db = open_db(db_path)?;
    let pipeline = parse_json("pipeline", pipeline)?;

    let results = db
        .collection(collection)
        .aggregate(&pipeline)
        .with_context(|| format!("Aggregation failed on collection: {}", collection))?;

    for doc in &results {
        print_json(doc)?;
    }
    Ok(())
}

/// Load schema from file or directory (modular)
fn load_schema(path: &Path, db_path: &Path, collection: Option<&str>) -> Result<()> {
    let db = open_db(db_path)?;

    if path.is_dir() {
        // Modular: load all *.schema.json files from directory
        let entries = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?;

        let mut count = 0;
        for entry in entries {
            let file_path = entry?.path();

            let Some(coll_name) = file_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".schema.json"))
            else {
                continue;
            };

            let schema = read_schema_file(&file_path)?;
            db.collection(coll_name)
                .set_schema(&schema)
                .with_context(|| format!("Failed to set schema for: {}", coll_name))?;

            println!("Loaded schema for '{}'", coll_name);
            count += 1;
        }

        println!("Total: {} schemas loaded from {}", count, path.display());
    } else {
        // Single file: require collection name
        let coll_name = collection.ok_or_else(|| {
            anyhow::anyhow!("--collection required when loading single schema file")
        })?;

        let schema = read_schema_file(path)?;
        db.collection(coll_name)
            .set_schema(&schema)
            .with_context(|| format!("Failed to set schema for: {}", coll_name))?;

        println!("Loaded schema for '{}' from {}", coll_name, path.display());
    }

    Ok(())
}

fn read_schema_file(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in: {}", path.display()))
}

/// Save schema to file or directory
fn save_schema(path: &Path, db_path: &Path, collection: Option<&str>, all: bool) -> Result<()> {
    let db = open_db(db_path)?;

    if all
        || path.is_dir()
        || (collection.is_none() && path.extension().is_none_or(|e| e != "json"))
    {
        // Export all schemas to directory
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;

        let mut count = 0;
        for coll_name in db.list_collections() {
            let Some(schema) = db.collection(&coll_name).schema() else {
                continue;
            };

            let file_path = path.join(format!("{}.schema.json", coll_name));
            let json = serde_json::to_string_pretty(&schema)
                .with_context(|| "Failed to serialize schema")?;
            fs::write(&file_path, json)
                .with_context(|| format!("Failed to write: {}", file_path.display()))?;

            println!(
                "Saved schema for '{}' to {}",
                coll_name,
                file_path.display()
            );
            count += 1;
        }

        println!("Total: {} schemas saved to {}", count, path.display());
    } else {
        // Single file export
        let coll_name = collection.ok_or_else(|| {
            anyhow::anyhow!("--collection required when saving single schema file")
        })?;

        let schema = db
            .collection(coll_name)
            .schema()
            .ok_or_else(|| anyhow::anyhow!("Collection '{}' has no schema", coll_name))?;

        let json =
            serde_json::to_string_pretty(&schema).with_context(|| "Failed to serialize schema")?;

        fs::write(path, json).with_context(|| format!("Failed to write: {}", path.display()))?;

        println!("Saved schema for '{}' to {}", coll_name, path.display());
    }

    Ok(())
}

fn step(title: &str) {
    println!();
    println!("== {} ==", title);
}

/// University walkthrough: embedding, projection, positional update,
/// aggregation, a two-collection transaction, indexes and schema validation
fn run_demo() -> Result<()> {
    let db = Database::open_in_memory();
    let students = db.collection("students");
    let courses = db.collection("courses");

    step("Document insertion and embedding");
    students.insert_many(vec![
        json!({"_id": 1, "name": "Alice", "courses": [
            {"code": "CS101", "grade": "A"},
            {"code": "MA101", "grade": "B+"}
        ]}),
        json!({"_id": 2, "name": "Bob", "courses": [
            {"code": "CS101", "grade": "A-"},
            {"code": "PH101", "grade": "B"}
        ]}),
    ])?;
    courses.insert_many(vec![
        json!({"_id": "CS101", "title": "Intro to CS", "credits": 4}),
        json!({"_id": "MA101", "title": "Calculus I", "credits": 3}),
        json!({"_id": "PH101", "title": "Physics I", "credits": 3}),
    ])?;
    println!("{} students, {} courses", students.len(), courses.len());

    step("Querying and projections");
    for doc in students.find(
        &json!({"name": "Alice"}),
        Some(&json!({"_id": 0, "name": 1, "courses": 1})),
    )? {
        print_json(&doc)?;
    }

    step("Nested field update");
    let result = students.update_one(
        &json!({"name": "Bob", "courses.code": "PH101"}),
        &json!({"$set": {"courses.$.grade": "A"}}),
    )?;
    println!(
        "matched {}, modified {}",
        result.matched_count, result.modified_count
    );
    if let Some(bob) = students.find_one(&json!({"_id": 2}))? {
        print_json(&bob)?;
    }

    step("Aggregation pipeline");
    let totals = students.aggregate(&json!([
        {"$unwind": "$courses"},
        {"$lookup": {
            "from": "courses",
            "localField": "courses.code",
            "foreignField": "_id",
            "as": "courseDetails"
        }},
        {"$unwind": "$courseDetails"},
        {"$group": {"_id": "$name", "totalCredits": {"$sum": "$courseDetails.credits"}}}
    ]))?;
    for doc in &totals {
        print_json(doc)?;
    }

    step("Transactions");
    let session = db.start_session();
    session.start_transaction()?;
    let outcome = session
        .collection("students")
        .insert_one(json!({"_id": 3, "name": "Charlie", "courses": []}))
        .and_then(|_| {
            session.collection("courses").update_one(
                &json!({"_id": "CS101"}),
                &json!({"$set": {"title": "Intro to Computer Science"}}),
            )
        })
        .and_then(|_| session.commit_transaction());
    match outcome {
        Ok(outcome) => println!(
            "transaction {} committed ({} writes)",
            outcome.transaction_id,
            outcome.writes.len()
        ),
        Err(err) => {
            session.abort_transaction();
            println!("Transaction aborted: {}", err);
        }
    }

    step("Indexing");
    println!("{}", students.create_index(&json!({"name": 1}), IndexOptions::new())?);
    println!("{}", courses.create_index(&json!({"credits": -1}), IndexOptions::new())?);

    step("Schema validation");
    let grades = db.create_collection(
        "grades",
        CreateCollectionOptions::new().with_validator(json!({
            "$jsonSchema": {
                "bsonType": "object",
                "required": ["studentId", "courseCode", "grade"],
                "properties": {
                    "studentId": {"bsonType": "int"},
                    "courseCode": {"bsonType": "string"},
                    "grade": {"bsonType": "string"}
                }
            }
        })),
    )?;
    let id = grades.insert_one(json!({"studentId": 1, "courseCode": "CS101", "grade": "A+"}))?;
    println!("inserted grade {}", id);
    match grades.insert_one(json!({"studentId": "one", "courseCode": "CS101"})) {
        Err(DocStoreError::SchemaViolation { violations, .. }) => {
            for violation in violations {
                println!("rejected: {}", violation);
            }
        }
        other => anyhow::bail!("expected a schema violation, got {:?}", other),
    }

    Ok(())
}
