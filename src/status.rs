//! Availability derived from a book's loan history.
//!
//! Nothing here is stored: a book is BORROWED exactly when one of its loans has
//! no return date, and a loan is overdue when it is still out and its due date
//! falls before the start of the current UTC day.

use chrono::{DateTime, NaiveTime, Utc};

use crate::model::{
    ActiveLoanInfo, BookDetailView, BookStatus, BookView, BookWithLoans, Loan, LoanHistoryEntry,
};

/// The loan that is still out, if any.
///
/// The first unreturned loan in slice order wins. Stores read loans ordered by
/// `borrowed_at, id`, so with a (normally impossible) duplicate this is the
/// oldest one.
pub fn active_loan(loans: &[Loan]) -> Option<&Loan> {
    loans.iter().find(|l| l.is_active())
}

pub fn derived_status(loans: &[Loan]) -> BookStatus {
    match active_loan(loans) {
        Some(_) => BookStatus::Borrowed,
        None => BookStatus::Available,
    }
}

pub fn is_overdue(loan: &Loan) -> bool {
    is_overdue_at(loan, Utc::now())
}

pub fn is_overdue_at(loan: &Loan, now: DateTime<Utc>) -> bool {
    if loan.returned_at.is_some() {
        return false;
    }
    match loan.due_at {
        Some(due_at) => due_at < start_of_day_utc(now),
        None => false,
    }
}

pub fn start_of_day_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub fn book_view(entry: &BookWithLoans) -> BookView {
    book_view_at(entry, Utc::now())
}

pub fn book_view_at(entry: &BookWithLoans, now: DateTime<Utc>) -> BookView {
    let active = active_loan(&entry.loans);

    BookView {
        book: entry.book.clone(),
        status: derived_status(&entry.loans),
        active_loan: active.map(|l| ActiveLoanInfo {
            borrower_name: l.borrower_name.clone(),
            borrower_email: l.borrower_email.clone(),
            borrower_phone: l.borrower_phone.clone(),
            borrowed_at: l.borrowed_at,
            due_at: l.due_at,
        }),
        overdue: active.map(|l| is_overdue_at(l, now)).unwrap_or(false),
    }
}

/// Book view plus the full loan history, most recent checkout first.
pub fn book_detail_view(entry: &BookWithLoans) -> BookDetailView {
    let mut history: Vec<&Loan> = entry.loans.iter().collect();
    history.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at).then(b.id.cmp(&a.id)));

    BookDetailView {
        view: book_view(entry),
        loan_history: history
            .into_iter()
            .map(|l| LoanHistoryEntry {
                id: l.id,
                borrower_name: l.borrower_name.clone(),
                borrower_email: l.borrower_email.clone(),
                borrower_phone: l.borrower_phone.clone(),
                borrowed_at: l.borrowed_at,
                due_at: l.due_at,
                returned_at: l.returned_at,
            })
            .collect(),
    }
}
