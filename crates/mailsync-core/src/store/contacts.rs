//! Address book and contact storage.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{EntityStore, StoreEvent};
use crate::Result;
use crate::contacts::{AddressBook, Contact};

fn row_to_address_book(row: &SqliteRow) -> AddressBook {
    AddressBook {
        id: row.get("id"),
        uuid: row.get("uuid"),
        name: row.get("name"),
        is_principal: row.get("is_principal"),
    }
}

fn row_to_contact(row: &SqliteRow) -> Result<Contact> {
    Ok(Contact {
        id: row.get("id"),
        name: row.get("name"),
        firstname: row.get("firstname"),
        lastname: row.get("lastname"),
        emails: serde_json::from_str(row.get("emails_json"))?,
        address_book_id: row.get("address_book_id"),
    })
}

async fn upsert_contact<'e, E>(executor: E, contact: &Contact) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r"
        INSERT INTO contacts (id, name, firstname, lastname, emails_json, address_book_id)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            firstname = excluded.firstname,
            lastname = excluded.lastname,
            emails_json = excluded.emails_json,
            address_book_id = excluded.address_book_id
        ",
    )
    .bind(&contact.id)
    .bind(&contact.name)
    .bind(&contact.firstname)
    .bind(&contact.lastname)
    .bind(serde_json::to_string(&contact.emails)?)
    .bind(contact.address_book_id)
    .execute(executor)
    .await?;
    Ok(())
}

impl EntityStore {
    /// Upserts address books and contacts in one transaction.
    ///
    /// Entries missing from the lists are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_contacts(
        &self,
        address_books: &[AddressBook],
        contacts: &[Contact],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for book in address_books {
            sqlx::query(
                r"
                INSERT INTO address_books (id, uuid, name, is_principal) VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    uuid = excluded.uuid,
                    name = excluded.name,
                    is_principal = excluded.is_principal
                ",
            )
            .bind(book.id)
            .bind(&book.uuid)
            .bind(&book.name)
            .bind(book.is_principal)
            .execute(&mut *tx)
            .await?;
        }
        for contact in contacts {
            upsert_contact(&mut *tx, contact).await?;
        }
        tx.commit().await?;
        self.notify(StoreEvent::ContactsChanged);
        Ok(())
    }

    /// Stores a single contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        upsert_contact(&self.pool, contact).await?;
        self.notify(StoreEvent::ContactsChanged);
        Ok(())
    }

    /// All stored contacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        let rows = sqlx::query("SELECT * FROM contacts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_contact).collect()
    }

    /// Contact by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn contact(&self, id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_contact).transpose()
    }

    /// All stored address books.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn address_books(&self) -> Result<Vec<AddressBook>> {
        let rows = sqlx::query("SELECT * FROM address_books ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_address_book).collect())
    }

    /// Address book by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn address_book(&self, id: i64) -> Result<Option<AddressBook>> {
        let row = sqlx::query("SELECT * FROM address_books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_address_book))
    }

    /// The address book new contacts go to.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn principal_address_book(&self) -> Result<Option<AddressBook>> {
        let row = sqlx::query("SELECT * FROM address_books WHERE is_principal = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_address_book))
    }
}
