use migration::MigratorTrait;
use mission_control_authz::entities;
use mission_control_authz::storage::DbAdapter;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn adapter(&self) -> DbAdapter {
        DbAdapter::new(self.connection.clone())
    }
}

pub async fn seed_person(db: &DatabaseConnection, id: &str, email: Option<&str>) {
    entities::person::ActiveModel {
        id: Set(id.to_string()),
        name: Set(id.to_string()),
        email: Set(email.map(str::to_string)),
        deleted_at: Set(None),
    }
    .insert(db)
    .await
    .expect("Failed to seed person");
}

pub async fn seed_team(db: &DatabaseConnection, id: &str, name: &str, members: &[&str]) {
    entities::team::ActiveModel {
        id: Set(id.to_string()),
        name: Set(name.to_string()),
        deleted_at: Set(None),
    }
    .insert(db)
    .await
    .expect("Failed to seed team");

    for member in members {
        entities::team_member::ActiveModel {
            team_id: Set(id.to_string()),
            person_id: Set(member.to_string()),
        }
        .insert(db)
        .await
        .expect("Failed to seed team member");
    }
}

pub async fn seed_agent(db: &DatabaseConnection, id: &str, name: &str) {
    entities::agent::ActiveModel {
        id: Set(id.to_string()),
        name: Set(name.to_string()),
        deleted_at: Set(None),
    }
    .insert(db)
    .await
    .expect("Failed to seed agent");
}
