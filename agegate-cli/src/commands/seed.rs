//! Seed command: replace the users collection with sample data

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use agegate_server::models::{NewUser, User};
use agegate_server::{ensure_schema, ConnectionManager, DatabaseConfig, MongoConnector, UserRepo};

/// Arguments for the seed command
#[derive(Parser, Debug)]
pub struct SeedArgs {
    /// Print the inserted users as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// Sample users spanning both sides of the visibility threshold.
pub fn sample_users() -> Vec<NewUser> {
    [
        ("John Doe", "john@example.com", 30, "Software Engineer"),
        ("Jane Smith", "jane@example.com", 25, "Product Manager"),
        ("Bob Johnson", "bob@example.com", 35, "Data Scientist"),
        ("Alice Brown", "alice@example.com", 19, "Student"),
        ("Charlie Wilson", "charlie@example.com", 21, "Intern"),
        ("David Miller", "david@example.com", 22, "Junior Developer"),
        ("Emily Davis", "emily@example.com", 28, "UX Designer"),
        ("Frank Thomas", "frank@example.com", 42, "Project Manager"),
        ("Grace Lee", "grace@example.com", 31, "Marketing Specialist"),
        ("Henry Wilson", "henry@example.com", 20, "Intern"),
    ]
    .into_iter()
    .map(|(name, email, age, occupation)| {
        NewUser::new(name, email, age).with_attr("occupation", occupation)
    })
    .collect()
}

/// Seed the configured database
pub async fn run_seed(args: SeedArgs) -> Result<()> {
    let (environment, config) = DatabaseConfig::from_env()?;
    tracing::info!(%environment, uri = %config.redacted_uri(), "Seeding database");

    let db = ConnectionManager::new(MongoConnector::new(config));
    let store = match db.connect().await {
        Ok(store) => store,
        Err(err) => {
            let _ = db.close().await;
            return Err(err).context("Failed to connect to database");
        }
    };

    let seeded: Result<Vec<User>> = async {
        ensure_schema(store.as_ref()).await?;
        UserRepo::new(Arc::clone(&db))
            .seed(sample_users())
            .await
            .context("Failed to seed users")
    }
    .await;
    db.close().await.context("Failed to close database connection")?;
    let users = seeded?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else {
        for user in &users {
            println!("{}  {:<16} {:<22} {}", user.id, user.name, user.email, user.age);
        }
        println!("Seeded {} users", users.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agegate_server::models::VISIBILITY_THRESHOLD;

    #[test]
    fn sample_users_cover_the_threshold() {
        let users = sample_users();
        assert_eq!(users.len(), 10);

        let visible = users.iter().filter(|u| u.age > VISIBILITY_THRESHOLD).count();
        assert_eq!(visible, 7);
        assert!(users.iter().any(|u| u.age == VISIBILITY_THRESHOLD));
    }

    #[test]
    fn sample_users_carry_occupation() {
        let users = sample_users();
        assert_eq!(
            users[0].extra.get("occupation"),
            Some(&serde_json::json!("Software Engineer"))
        );
        assert!(users.iter().all(|u| u.extra.contains_key("occupation")));
    }

    #[test]
    fn sample_emails_are_unique() {
        let users = sample_users();
        let mut emails: Vec<_> = users.iter().map(|u| u.email.as_str()).collect();
        emails.sort_unstable();
        emails.dedup();
        assert_eq!(emails.len(), users.len());
    }
}
