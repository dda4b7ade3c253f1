//! Sample catalog for local development: ten books and four loans covering
//! the active, returned and overdue cases.

use chrono::{DateTime, Duration, Utc};

use crate::catalog::input::NewBook;
use crate::catalog::{Catalog, LoanRecord};
use crate::db::Database;
use crate::error::CatalogError;

struct SeedBook {
    title: &'static str,
    author: &'static str,
    isbn: Option<&'static str>,
    category: &'static str,
    published_year: i32,
    description: Option<&'static str>,
}

const BOOKS: &[SeedBook] = &[
    SeedBook {
        title: "The Great Gatsby",
        author: "F. Scott Fitzgerald",
        isbn: Some("978-0-7432-7356-5"),
        category: "Fiction",
        published_year: 1925,
        description: Some("A story of decadence and the American Dream set in the Jazz Age."),
    },
    SeedBook {
        title: "To Kill a Mockingbird",
        author: "Harper Lee",
        isbn: Some("978-0-06-112008-4"),
        category: "Fiction",
        published_year: 1960,
        description: None,
    },
    SeedBook {
        title: "1984",
        author: "George Orwell",
        isbn: Some("978-0-452-28423-4"),
        category: "Science Fiction",
        published_year: 1949,
        description: None,
    },
    SeedBook {
        title: "Pride and Prejudice",
        author: "Jane Austen",
        isbn: Some("978-0-14-143951-8"),
        category: "Romance",
        published_year: 1813,
        description: None,
    },
    SeedBook {
        title: "The Catcher in the Rye",
        author: "J.D. Salinger",
        isbn: None,
        category: "Fiction",
        published_year: 1951,
        description: None,
    },
    SeedBook {
        title: "Clean Code",
        author: "Robert C. Martin",
        isbn: Some("978-0-13-235088-4"),
        category: "Technology",
        published_year: 2008,
        description: None,
    },
    SeedBook {
        title: "Designing Data-Intensive Applications",
        author: "Martin Kleppmann",
        isbn: Some("978-1-4493-7332-0"),
        category: "Technology",
        published_year: 2017,
        description: None,
    },
    SeedBook {
        title: "The Hobbit",
        author: "J.R.R. Tolkien",
        isbn: Some("978-0-547-92822-7"),
        category: "Fantasy",
        published_year: 1937,
        description: None,
    },
    SeedBook {
        title: "Dune",
        author: "Frank Herbert",
        isbn: None,
        category: "Science Fiction",
        published_year: 1965,
        description: None,
    },
    SeedBook {
        title: "The Pragmatic Programmer",
        author: "David Thomas, Andrew Hunt",
        isbn: Some("978-0-13-595705-9"),
        category: "Technology",
        published_year: 2019,
        description: None,
    },
];

#[derive(Debug, Default, PartialEq)]
pub struct SeedSummary {
    pub books: usize,
    pub loans: usize,
}

fn loans_for(ids: &[i32], now: DateTime<Utc>) -> Vec<LoanRecord> {
    let day = Duration::days(1);
    let loan = |idx: usize, name: &str, email: &str, phone: Option<&str>| LoanRecord {
        book_id: ids[idx],
        borrower_name: name.to_string(),
        borrower_email: Some(email.to_string()),
        borrower_phone: phone.map(String::from),
        borrowed_at: now,
        due_at: None,
        returned_at: None,
    };

    if ids.len() < 4 {
        return vec![];
    }

    vec![
        LoanRecord {
            due_at: Some(now + day * 7),
            ..loan(0, "Alice", "alice@example.com", Some("+1-555-0100"))
        },
        LoanRecord {
            borrowed_at: now - day * 14,
            returned_at: Some(now - day * 7),
            ..loan(1, "Bob", "bob@example.com", None)
        },
        LoanRecord {
            borrowed_at: now - day * 14,
            due_at: Some(now - day * 5),
            ..loan(2, "Carol", "carol@example.com", Some("+1-555-0102"))
        },
        LoanRecord {
            borrowed_at: now - day * 10,
            due_at: Some(now - day * 2),
            ..loan(3, "Dave", "dave@example.com", Some("+1-555-0103"))
        },
    ]
}

/// Replaces all books and loans with the sample data.
pub async fn run(db: &Database, now: DateTime<Utc>) -> Result<SeedSummary, CatalogError> {
    let catalog = Catalog::new(db);
    catalog.clear().await?;

    let mut ids = Vec::with_capacity(BOOKS.len());
    for b in BOOKS {
        let entry = catalog
            .create_book(NewBook {
                title: b.title.to_string(),
                author: b.author.to_string(),
                isbn: b.isbn.map(String::from),
                category: Some(b.category.to_string()),
                published_year: Some(b.published_year),
                description: b.description.map(String::from),
            })
            .await?;
        ids.push(entry.book.id);
    }

    let loans = loans_for(&ids, now);
    for record in &loans {
        catalog.insert_loan(record).await?;
    }

    let summary = SeedSummary {
        books: ids.len(),
        loans: loans.len(),
    };
    tracing::info!(books = summary.books, loans = summary.loans, "seed completed");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stats;

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let db = Database::open_local(":memory:").await.unwrap();
        let now = Utc::now();

        let first = run(&db, now).await.unwrap();
        assert_eq!(first, SeedSummary { books: 10, loans: 4 });
        let second = run(&db, now).await.unwrap();
        assert_eq!(second, first);

        let stats = Catalog::new(&db).stats(now).await.unwrap();
        assert_eq!(
            stats,
            Stats {
                total: 10,
                available: 7,
                borrowed: 3,
                overdue: 2,
            }
        );

        let overdue = Catalog::new(&db).overdue_loans(now).await.unwrap();
        assert_eq!(overdue.len(), 2);
    }
}
