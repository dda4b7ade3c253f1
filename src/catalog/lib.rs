use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::input::{BookChanges, NewBook, NewLoan};
use crate::api::{HandlerParams, StatusFilter};
use crate::db::{Database, format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::error::CatalogError;
use crate::model::{Book, BookStatus, BookSuggestion, BookWithLoans, BorrowerLoan, Loan, OverdueLoan, Stats};
use crate::status::{active_loan, derived_status, is_overdue_at};

const BOOK_COLUMNS: &str = r#"
    books.id, books.title, books.author, books.isbn, books.category,
    books.published_year, books.description, books.created_at, books.updated_at
"#;

const LOAN_COLUMNS: &str = r#"
    loans.id, loans.book_id, loans.borrower_name, loans.borrower_email, loans.borrower_phone,
    loans.borrowed_at, loans.due_at, loans.returned_at
"#;

/// A loan row written verbatim, used when importing history.
#[derive(Debug, Clone)]
pub struct LoanRecord {
    pub book_id: i32,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSuggestion {
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub notes: Option<String>,
}

pub struct Catalog<'a> {
    db: &'a Database,
}

impl<'a> Catalog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Books
    // ------------------------------------------------------------------

    pub async fn list_books(&self, params: &HandlerParams) -> Result<Vec<BookWithLoans>, CatalogError> {
        let mut sql = format!("SELECT {BOOK_COLUMNS} FROM books");
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(query) = &params.query {
            let mut fields = vec!["books.title", "books.author", "books.category", "books.description"];
            if looks_like_isbn(query) {
                fields.push("books.isbn");
            }
            let clause = fields
                .iter()
                .map(|f| format!("{f} LIKE ?1 ESCAPE '\\'"))
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(" WHERE {clause}"));
            values.push(format!("%{}%", escape_like(query)).into());
        }
        sql.push_str(&format!(" ORDER BY {}", params.sort.order_by()));

        let mut rows = self.db.connection().query(&sql, values).await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(row_to_book(&row)?);
        }

        let mut loans = self.loans_by_book().await?;
        let wanted = match params.status {
            StatusFilter::All => None,
            StatusFilter::Available => Some(BookStatus::Available),
            StatusFilter::Borrowed => Some(BookStatus::Borrowed),
        };

        Ok(books
            .into_iter()
            .map(|book| BookWithLoans {
                loans: loans.remove(&book.id).unwrap_or_default(),
                book,
            })
            .filter(|entry| wanted.is_none_or(|status| derived_status(&entry.loans) == status))
            .collect())
    }

    pub async fn get_book(&self, id: i32) -> Result<Option<BookWithLoans>, CatalogError> {
        let query = format!("SELECT {BOOK_COLUMNS} FROM books WHERE books.id = ?");
        let mut rows = self.db.connection().query(&query, libsql::params![id]).await?;

        let book = match rows.next().await? {
            Some(row) => row_to_book(&row)?,
            None => return Ok(None),
        };

        let loans = self.loans_for_book(id).await?;
        Ok(Some(BookWithLoans { book, loans }))
    }

    async fn book_exists(&self, id: i32) -> Result<bool, CatalogError> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT 1 FROM books WHERE id = ?", libsql::params![id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn require_book(&self, id: i32) -> Result<BookWithLoans, CatalogError> {
        self.get_book(id).await?.ok_or(CatalogError::BookNotFound)
    }

    pub async fn create_book(&self, input: NewBook) -> Result<BookWithLoans, CatalogError> {
        let query = r#"
            INSERT INTO books (title, author, isbn, category, published_year, description)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
        "#;

        let guard = self.db.write_lock().await;
        let mut rows = self
            .db
            .connection()
            .query(
                query,
                libsql::params![
                    input.title,
                    input.author,
                    input.isbn,
                    input.category,
                    input.published_year,
                    input.description
                ],
            )
            .await
            .map_err(CatalogError::from_constraint)?;

        let id: i32 = match rows.next().await.map_err(CatalogError::from_constraint)? {
            Some(row) => row.get(0)?,
            None => return Err(anyhow::anyhow!("Failed to create book").into()),
        };
        drop(rows);
        drop(guard);

        self.require_book(id).await
    }

    pub async fn update_book(&self, id: i32, changes: BookChanges) -> Result<BookWithLoans, CatalogError> {
        if !self.book_exists(id).await? {
            return Err(CatalogError::BookNotFound);
        }
        if changes.is_empty() {
            return self.require_book(id).await;
        }

        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(title) = changes.title {
            updates.push("title = ?");
            params.push(title.into());
        }
        if let Some(author) = changes.author {
            updates.push("author = ?");
            params.push(author.into());
        }
        if let Some(isbn) = changes.isbn {
            updates.push("isbn = ?");
            params.push(text_or_null(isbn));
        }
        if let Some(category) = changes.category {
            updates.push("category = ?");
            params.push(text_or_null(category));
        }
        if let Some(year) = changes.published_year {
            updates.push("published_year = ?");
            params.push(year.map(|y| libsql::Value::Integer(y as i64)).unwrap_or(libsql::Value::Null));
        }
        if let Some(description) = changes.description {
            updates.push("description = ?");
            params.push(text_or_null(description));
        }

        updates.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')");
        params.push(id.into());

        let query = format!("UPDATE books SET {} WHERE id = ?", updates.join(", "));
        {
            let _guard = self.db.write_lock().await;
            self.db
                .connection()
                .execute(&query, params)
                .await
                .map_err(CatalogError::from_constraint)?;
        }

        self.require_book(id).await
    }

    pub async fn delete_book(&self, id: i32) -> Result<(), CatalogError> {
        let _guard = self.db.write_lock().await;

        self.db.begin().await?;

        let result = async {
            self.db
                .connection()
                .execute("DELETE FROM loans WHERE book_id = ?", libsql::params![id])
                .await?;
            let deleted = self
                .db
                .connection()
                .execute("DELETE FROM books WHERE id = ?", libsql::params![id])
                .await?;
            if deleted == 0 {
                return Err(CatalogError::BookNotFound);
            }
            Ok::<(), CatalogError>(())
        }
        .await;

        match result {
            Ok(_) => {
                self.db.commit().await?;
                Ok(())
            }
            Err(e) => {
                self.db.rollback().await;
                Err(e)
            }
        }
    }

    /// Removes every loan and book. Used when reseeding.
    pub async fn clear(&self) -> Result<(), CatalogError> {
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute_batch("BEGIN; DELETE FROM loans; DELETE FROM books; COMMIT;")
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Circulation
    // ------------------------------------------------------------------

    /// Opens a loan. The existence check, active-loan check and insert run
    /// in one transaction; the partial unique index on active loans backs it up.
    pub async fn checkout(&self, book_id: i32, loan: NewLoan, now: DateTime<Utc>) -> Result<BookWithLoans, CatalogError> {
        {
            let _guard = self.db.write_lock().await;

            self.db.begin().await?;

            match self.checkout_internal(book_id, &loan, now).await {
                Ok(loan_id) => {
                    self.db.commit().await?;
                    tracing::info!(book_id, loan_id, "book checked out");
                }
                Err(e) => {
                    self.db.rollback().await;
                    return Err(e);
                }
            }
        }

        self.require_book(book_id).await
    }

    async fn checkout_internal(&self, book_id: i32, loan: &NewLoan, now: DateTime<Utc>) -> Result<i32, CatalogError> {
        if !self.book_exists(book_id).await? {
            return Err(CatalogError::BookNotFound);
        }

        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT 1 FROM loans WHERE book_id = ? AND returned_at IS NULL LIMIT 1",
                libsql::params![book_id],
            )
            .await?;
        if rows.next().await?.is_some() {
            return Err(CatalogError::AlreadyBorrowed);
        }

        self.insert_loan_row(&LoanRecord {
            book_id,
            borrower_name: loan.borrower_name.clone(),
            borrower_email: loan.borrower_email.clone(),
            borrower_phone: loan.borrower_phone.clone(),
            borrowed_at: now,
            due_at: loan.due_at,
            returned_at: None,
        })
        .await
    }

    /// Closes the active loan with a single conditional update.
    pub async fn checkin(&self, book_id: i32, now: DateTime<Utc>) -> Result<BookWithLoans, CatalogError> {
        if !self.book_exists(book_id).await? {
            return Err(CatalogError::BookNotFound);
        }

        let closed = {
            let _guard = self.db.write_lock().await;
            self.db
                .connection()
                .execute(
                    "UPDATE loans SET returned_at = ? WHERE book_id = ? AND returned_at IS NULL",
                    libsql::params![format_timestamp(now), book_id],
                )
                .await?
        };
        if closed == 0 {
            return Err(CatalogError::NotBorrowed);
        }
        tracing::info!(book_id, "book checked in");

        self.require_book(book_id).await
    }

    pub async fn insert_loan(&self, record: &LoanRecord) -> Result<i32, CatalogError> {
        let _guard = self.db.write_lock().await;
        self.insert_loan_row(record).await
    }

    /// Caller holds the write lock.
    async fn insert_loan_row(&self, record: &LoanRecord) -> Result<i32, CatalogError> {
        let query = r#"
            INSERT INTO loans (book_id, borrower_name, borrower_email, borrower_phone, borrowed_at, due_at, returned_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#;

        let mut rows = self
            .db
            .connection()
            .query(
                query,
                libsql::params![
                    record.book_id,
                    record.borrower_name.clone(),
                    record.borrower_email.clone(),
                    record.borrower_phone.clone(),
                    format_timestamp(record.borrowed_at),
                    record.due_at.map(format_timestamp),
                    record.returned_at.map(format_timestamp)
                ],
            )
            .await
            .map_err(CatalogError::from_constraint)?;

        match rows.next().await.map_err(CatalogError::from_constraint)? {
            Some(row) => Ok(row.get(0)?),
            None => Err(anyhow::anyhow!("Failed to create loan").into()),
        }
    }

    async fn loans_for_book(&self, book_id: i32) -> Result<Vec<Loan>, CatalogError> {
        let query = format!("SELECT {LOAN_COLUMNS} FROM loans WHERE loans.book_id = ? ORDER BY loans.borrowed_at ASC, loans.id ASC");
        let mut rows = self.db.connection().query(&query, libsql::params![book_id]).await?;

        let mut loans = Vec::new();
        while let Some(row) = rows.next().await? {
            loans.push(row_to_loan(&row)?);
        }
        Ok(loans)
    }

    async fn loans_by_book(&self) -> Result<HashMap<i32, Vec<Loan>>, CatalogError> {
        let query = format!("SELECT {LOAN_COLUMNS} FROM loans ORDER BY loans.book_id, loans.borrowed_at ASC, loans.id ASC");
        let mut rows = self.db.connection().query(&query, ()).await?;

        let mut by_book: HashMap<i32, Vec<Loan>> = HashMap::new();
        while let Some(row) = rows.next().await? {
            let loan = row_to_loan(&row)?;
            by_book.entry(loan.book_id).or_default().push(loan);
        }
        Ok(by_book)
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<Stats, CatalogError> {
        let books = self.list_books(&HandlerParams::default()).await?;
        let mut stats = Stats {
            total: books.len() as i32,
            ..Default::default()
        };

        for entry in &books {
            match active_loan(&entry.loans) {
                None => stats.available += 1,
                Some(loan) => {
                    stats.borrowed += 1;
                    if is_overdue_at(loan, now) {
                        stats.overdue += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    pub async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<OverdueLoan>, CatalogError> {
        let query = format!(
            r#"
            SELECT {LOAN_COLUMNS}, books.title
            FROM loans
            JOIN books ON books.id = loans.book_id
            WHERE loans.returned_at IS NULL AND loans.due_at IS NOT NULL
            ORDER BY loans.due_at ASC, loans.id ASC
            "#
        );
        let mut rows = self.db.connection().query(&query, ()).await?;

        let mut overdue = Vec::new();
        while let Some(row) = rows.next().await? {
            let loan = row_to_loan(&row)?;
            let book_title: String = row.get(8)?;
            if !is_overdue_at(&loan, now) {
                continue;
            }
            if let Some(due_at) = loan.due_at {
                overdue.push(OverdueLoan {
                    id: loan.id,
                    book_id: loan.book_id,
                    book_title,
                    borrower_name: loan.borrower_name,
                    borrower_email: loan.borrower_email,
                    borrower_phone: loan.borrower_phone,
                    borrowed_at: loan.borrowed_at,
                    due_at,
                });
            }
        }
        Ok(overdue)
    }

    /// Loans recorded under `email`, compared trimmed and case-insensitively.
    pub async fn loans_for_borrower(&self, email: &str, now: DateTime<Utc>) -> Result<Vec<BorrowerLoan>, CatalogError> {
        let query = format!(
            r#"
            SELECT {LOAN_COLUMNS}, books.title
            FROM loans
            JOIN books ON books.id = loans.book_id
            WHERE lower(trim(loans.borrower_email)) = ?
            ORDER BY loans.borrowed_at DESC, loans.id DESC
            "#
        );
        let normalized = email.trim().to_lowercase();
        let mut rows = self.db.connection().query(&query, libsql::params![normalized]).await?;

        let mut loans = Vec::new();
        while let Some(row) = rows.next().await? {
            let loan = row_to_loan(&row)?;
            let book_title: String = row.get(8)?;
            loans.push(BorrowerLoan {
                overdue: is_overdue_at(&loan, now),
                id: loan.id,
                book_id: loan.book_id,
                book_title,
                borrower_name: loan.borrower_name,
                borrowed_at: loan.borrowed_at,
                due_at: loan.due_at,
                returned_at: loan.returned_at,
            });
        }
        Ok(loans)
    }

    /// Books currently on the shelf, by title.
    pub async fn available_books(&self) -> Result<Vec<Book>, CatalogError> {
        let params = HandlerParams {
            status: StatusFilter::Available,
            ..Default::default()
        };
        Ok(self.list_books(&params).await?.into_iter().map(|e| e.book).collect())
    }

    // ------------------------------------------------------------------
    // Patron requests
    // ------------------------------------------------------------------

    pub async fn list_suggestions(&self) -> Result<Vec<BookSuggestion>, CatalogError> {
        let query = r#"
            SELECT id, title, author, category, notes, created_at
            FROM book_suggestions
            ORDER BY created_at DESC, id DESC
        "#;
        let mut rows = self.db.connection().query(query, ()).await?;

        let mut suggestions = Vec::new();
        while let Some(row) = rows.next().await? {
            suggestions.push(row_to_suggestion(&row)?);
        }
        Ok(suggestions)
    }

    pub async fn create_suggestion(&self, input: NewSuggestion) -> Result<BookSuggestion, CatalogError> {
        let query = r#"
            INSERT INTO book_suggestions (title, author, category, notes)
            VALUES (?, ?, ?, ?)
            RETURNING id, title, author, category, notes, created_at
        "#;
        let _guard = self.db.write_lock().await;
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![input.title, input.author, input.category, input.notes])
            .await?;

        match rows.next().await? {
            Some(row) => row_to_suggestion(&row),
            None => Err(anyhow::anyhow!("Failed to create suggestion").into()),
        }
    }
}

fn text_or_null(value: Option<String>) -> libsql::Value {
    value.map(libsql::Value::Text).unwrap_or(libsql::Value::Null)
}

/// Digits and dashes, starting with a digit.
fn looks_like_isbn(query: &str) -> bool {
    query.starts_with(|c: char| c.is_ascii_digit()) && query.chars().all(|c| c.is_ascii_digit() || c == '-')
}

fn escape_like(query: &str) -> String {
    query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_book(row: &libsql::Row) -> Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        isbn: row.get(3)?,
        category: row.get(4)?,
        published_year: row.get(5)?,
        description: row.get(6)?,
        created_at: parse_timestamp(&row.get::<String>(7)?)?,
        updated_at: parse_timestamp(&row.get::<String>(8)?)?,
    })
}

fn row_to_loan(row: &libsql::Row) -> Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        book_id: row.get(1)?,
        borrower_name: row.get(2)?,
        borrower_email: row.get(3)?,
        borrower_phone: row.get(4)?,
        borrowed_at: parse_timestamp(&row.get::<String>(5)?)?,
        due_at: parse_optional_timestamp(row.get(6)?)?,
        returned_at: parse_optional_timestamp(row.get(7)?)?,
    })
}

fn row_to_suggestion(row: &libsql::Row) -> Result<BookSuggestion, CatalogError> {
    Ok(BookSuggestion {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        category: row.get(3)?,
        notes: row.get(4)?,
        created_at: parse_timestamp(&row.get::<String>(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SortOrder;
    use chrono::Duration;
    use std::sync::Arc;

    async fn setup() -> Database {
        Database::open_local(":memory:").await.unwrap()
    }

    fn new_book(title: &str, author: &str, isbn: Option<&str>) -> NewBook {
        NewBook {
            title: title.into(),
            author: author.into(),
            isbn: isbn.map(String::from),
            category: Some("Fiction".into()),
            published_year: Some(1950),
            description: None,
        }
    }

    fn new_loan(name: &str, due_at: Option<DateTime<Utc>>) -> NewLoan {
        NewLoan {
            borrower_name: name.into(),
            borrower_email: Some(format!("{}@example.com", name.to_lowercase())),
            borrower_phone: None,
            due_at,
        }
    }

    async fn count_loans(db: &Database, book_id: i32) -> i64 {
        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM loans WHERE book_id = ?", libsql::params![book_id])
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_book() {
        let db = setup().await;
        let catalog = Catalog::new(&db);

        let created = catalog.create_book(new_book("Dune", "Frank Herbert", Some("978-0441013593"))).await.unwrap();
        assert!(created.loans.is_empty());

        let fetched = catalog.get_book(created.book.id).await.unwrap().unwrap();
        assert_eq!(fetched.book.title, "Dune");
        assert_eq!(fetched.book.isbn.as_deref(), Some("978-0441013593"));
        assert_eq!(fetched.book.published_year, Some(1950));

        assert!(catalog.get_book(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_isbn_is_a_conflict() {
        let db = setup().await;
        let catalog = Catalog::new(&db);

        catalog.create_book(new_book("A", "X", Some("123"))).await.unwrap();
        let err = catalog.create_book(new_book("B", "Y", Some("123"))).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIsbn));

        // books without an isbn never collide
        catalog.create_book(new_book("C", "Z", None)).await.unwrap();
        catalog.create_book(new_book("D", "Z", None)).await.unwrap();

        let other = catalog.create_book(new_book("E", "Q", Some("456"))).await.unwrap();
        let changes = BookChanges {
            isbn: Some(Some("123".into())),
            ..Default::default()
        };
        let err = catalog.update_book(other.book.id, changes).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIsbn));
    }

    #[tokio::test]
    async fn test_update_book_partial_and_clear() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let created = catalog.create_book(new_book("Dune", "Frank Herbert", Some("111"))).await.unwrap();

        let changes = BookChanges {
            title: Some("Dune Messiah".into()),
            isbn: Some(None),
            ..Default::default()
        };
        let updated = catalog.update_book(created.book.id, changes).await.unwrap();
        assert_eq!(updated.book.title, "Dune Messiah");
        assert_eq!(updated.book.author, "Frank Herbert");
        assert_eq!(updated.book.isbn, None);
        assert_eq!(updated.book.category.as_deref(), Some("Fiction"));

        let err = catalog.update_book(4242, BookChanges::default()).await.unwrap_err();
        assert!(matches!(err, CatalogError::BookNotFound));
    }

    #[tokio::test]
    async fn test_checkout_and_checkin_lifecycle() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();
        let book = catalog.create_book(new_book("1984", "George Orwell", None)).await.unwrap();
        let id = book.book.id;

        let borrowed = catalog.checkout(id, new_loan("Alice", None), now).await.unwrap();
        assert_eq!(derived_status(&borrowed.loans), BookStatus::Borrowed);

        let err = catalog.checkout(id, new_loan("Bob", None), now).await.unwrap_err();
        assert!(matches!(err, CatalogError::AlreadyBorrowed));
        assert_eq!(count_loans(&db, id).await, 1);

        let returned = catalog.checkin(id, now).await.unwrap();
        assert_eq!(derived_status(&returned.loans), BookStatus::Available);

        let err = catalog.checkin(id, now).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotBorrowed));
    }

    #[tokio::test]
    async fn test_two_cycles_leave_one_returned_and_one_active() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();
        let id = catalog.create_book(new_book("Emma", "Jane Austen", None)).await.unwrap().book.id;

        catalog.checkout(id, new_loan("Alice", None), now).await.unwrap();
        catalog.checkin(id, now + Duration::minutes(1)).await.unwrap();
        let entry = catalog.checkout(id, new_loan("Bob", None), now + Duration::minutes(2)).await.unwrap();

        assert_eq!(entry.loans.len(), 2);
        assert_eq!(entry.loans[0].borrower_name, "Alice");
        assert!(entry.loans[0].returned_at.is_some());
        assert_eq!(entry.loans[1].borrower_name, "Bob");
        assert!(entry.loans[1].returned_at.is_none());
        assert_eq!(active_loan(&entry.loans).map(|l| l.id), Some(entry.loans[1].id));
    }

    #[tokio::test]
    async fn test_active_loan_index_rejects_second_active_row() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();
        let id = catalog.create_book(new_book("Ulysses", "James Joyce", None)).await.unwrap().book.id;

        let record = LoanRecord {
            book_id: id,
            borrower_name: "Alice".into(),
            borrower_email: None,
            borrower_phone: None,
            borrowed_at: now,
            due_at: None,
            returned_at: None,
        };
        catalog.insert_loan(&record).await.unwrap();
        let err = catalog.insert_loan(&record).await.unwrap_err();
        assert!(matches!(err, CatalogError::AlreadyBorrowed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rolled_back_checkout_keeps_concurrent_writes() {
        let db = Arc::new(setup().await);
        let now = Utc::now();
        let held = Catalog::new(&db).create_book(new_book("Held", "X", None)).await.unwrap().book.id;
        Catalog::new(&db).checkout(held, new_loan("Alice", None), now).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..100 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                let catalog = Catalog::new(&db);
                let err = catalog.checkout(held, new_loan("Bob", None), now).await.unwrap_err();
                assert!(matches!(err, CatalogError::AlreadyBorrowed));
                catalog.create_book(new_book(&format!("Book {i}"), "Y", None)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = Catalog::new(&db).list_books(&HandlerParams::default()).await.unwrap();
        assert_eq!(stored.len(), 101);
        assert_eq!(count_loans(&db, held).await, 1);
    }

    #[tokio::test]
    async fn test_checkout_missing_book() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let err = catalog.checkout(77, new_loan("Alice", None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CatalogError::BookNotFound));
        let err = catalog.checkin(77, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CatalogError::BookNotFound));
    }

    #[tokio::test]
    async fn test_delete_book_removes_loans() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let id = catalog.create_book(new_book("Dracula", "Bram Stoker", None)).await.unwrap().book.id;
        catalog.checkout(id, new_loan("Alice", None), Utc::now()).await.unwrap();

        catalog.delete_book(id).await.unwrap();
        assert!(catalog.get_book(id).await.unwrap().is_none());
        assert_eq!(count_loans(&db, id).await, 0);

        let err = catalog.delete_book(id).await.unwrap_err();
        assert!(matches!(err, CatalogError::BookNotFound));
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();

        let hobbit = catalog.create_book(new_book("The Hobbit", "J.R.R. Tolkien", Some("978-0-547-92822-7"))).await.unwrap();
        catalog.create_book(new_book("dune", "Frank Herbert", None)).await.unwrap();
        catalog.create_book(new_book("Clean Code", "Robert C. Martin", None)).await.unwrap();
        catalog.checkout(hobbit.book.id, new_loan("Alice", None), now).await.unwrap();

        let titles = |entries: Vec<BookWithLoans>| entries.into_iter().map(|e| e.book.title).collect::<Vec<_>>();

        let all = catalog.list_books(&HandlerParams::default()).await.unwrap();
        assert_eq!(titles(all), vec!["Clean Code", "dune", "The Hobbit"]);

        let by_author = HandlerParams {
            sort: SortOrder::Author,
            ..Default::default()
        };
        assert_eq!(
            titles(catalog.list_books(&by_author).await.unwrap()),
            vec!["dune", "The Hobbit", "Clean Code"]
        );

        let newest = HandlerParams {
            sort: SortOrder::Newest,
            ..Default::default()
        };
        assert_eq!(
            titles(catalog.list_books(&newest).await.unwrap()),
            vec!["Clean Code", "dune", "The Hobbit"]
        );

        let borrowed = HandlerParams {
            status: StatusFilter::Borrowed,
            ..Default::default()
        };
        assert_eq!(titles(catalog.list_books(&borrowed).await.unwrap()), vec!["The Hobbit"]);

        let available = HandlerParams {
            status: StatusFilter::Available,
            ..Default::default()
        };
        assert_eq!(titles(catalog.list_books(&available).await.unwrap()), vec!["Clean Code", "dune"]);

        let search = HandlerParams {
            query: Some("TOLKIEN".into()),
            ..Default::default()
        };
        assert_eq!(titles(catalog.list_books(&search).await.unwrap()), vec!["The Hobbit"]);

        let by_isbn = HandlerParams {
            query: Some("978-0-547".into()),
            ..Default::default()
        };
        assert_eq!(titles(catalog.list_books(&by_isbn).await.unwrap()), vec!["The Hobbit"]);

        let wildcard = HandlerParams {
            query: Some("%".into()),
            ..Default::default()
        };
        assert!(catalog.list_books(&wildcard).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_overdue_report() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();

        let a = catalog.create_book(new_book("A", "X", None)).await.unwrap().book.id;
        let b = catalog.create_book(new_book("B", "X", None)).await.unwrap().book.id;
        catalog.create_book(new_book("C", "X", None)).await.unwrap();

        catalog.checkout(a, new_loan("Carol", Some(now - Duration::days(5))), now).await.unwrap();
        catalog.checkout(b, new_loan("Dave", Some(now + Duration::days(7))), now).await.unwrap();

        let stats = catalog.stats(now).await.unwrap();
        assert_eq!(
            stats,
            Stats {
                total: 3,
                available: 1,
                borrowed: 2,
                overdue: 1,
            }
        );

        let overdue = catalog.overdue_loans(now).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].book_title, "A");
        assert_eq!(overdue[0].borrower_name, "Carol");
    }

    #[tokio::test]
    async fn test_loans_for_borrower_matches_email_loosely() {
        let db = setup().await;
        let catalog = Catalog::new(&db);
        let now = Utc::now();
        let a = catalog.create_book(new_book("A", "X", None)).await.unwrap().book.id;
        let b = catalog.create_book(new_book("B", "X", None)).await.unwrap().book.id;

        let mut loan = new_loan("Alice", Some(now - Duration::days(3)));
        loan.borrower_email = Some("Alice@Example.com".into());
        catalog.checkout(a, loan, now - Duration::days(10)).await.unwrap();
        catalog.checkout(b, new_loan("Bob", None), now).await.unwrap();

        let mine = catalog.loans_for_borrower("  alice@example.COM ", now).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].book_title, "A");
        assert!(mine[0].overdue);
    }

    #[tokio::test]
    async fn test_suggestions_newest_first() {
        let db = setup().await;
        let catalog = Catalog::new(&db);

        for title in ["First", "Second"] {
            catalog
                .create_suggestion(NewSuggestion {
                    title: title.into(),
                    author: "Someone".into(),
                    category: None,
                    notes: Some("please".into()),
                })
                .await
                .unwrap();
        }

        let list = catalog.list_suggestions().await.unwrap();
        let titles: Vec<&str> = list.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Second", "First"]);
    }

    #[test]
    fn test_isbn_query_detection() {
        assert!(looks_like_isbn("978-0-13"));
        assert!(looks_like_isbn("9780131"));
        assert!(!looks_like_isbn("-978"));
        assert!(!looks_like_isbn("978x"));
    }
}
