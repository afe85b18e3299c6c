//! `MetadataStore` over SQLite

use super::{
    Chat, EntityKind, JsonRow, JsonSource, KnowledgeBase, MetadataStore, OwnedRow, Role,
    SqliteStore, User,
};
use crate::error::Result;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::debug;

impl JsonSource {
    fn batch_query(&self) -> &'static str {
        match self {
            Self::Chats => {
                "SELECT rowid, id, chat FROM chat
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
            }
            Self::Folders => {
                "SELECT rowid, id, items, data FROM folder
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
            }
            Self::Messages => {
                "SELECT rowid, id, data FROM message
                 WHERE rowid > ?1 AND data IS NOT NULL AND data != ''
                 ORDER BY rowid LIMIT ?2"
            }
        }
    }

    fn field_count(&self) -> usize {
        match self {
            Self::Folders => 2,
            Self::Chats | Self::Messages => 1,
        }
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        role: Role::parse(&role),
        last_active_at: row.get(3)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        user_id: row.get(1)?,
        updated_at: row.get(2)?,
        archived: row.get(3)?,
        pinned: row.get(4)?,
        folder_id: row.get(5)?,
    })
}

impl MetadataStore for SqliteStore {
    fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, role, last_active_at FROM user ORDER BY id")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        self.conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| {
            self.conn
                .execute("DELETE FROM chat WHERE user_id = ?1", params![id])?;
            let rows = self
                .conn
                .execute("DELETE FROM user WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })();

        if result.is_ok() {
            self.conn.execute("COMMIT", [])?;
        } else {
            let _ = self.conn.execute("ROLLBACK", []);
        }
        result
    }

    fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, updated_at, archived, pinned, folder_id FROM chat ORDER BY id",
        )?;
        let chats = stmt
            .query_map([], chat_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, user_id, data FROM knowledge ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let kbs = rows
            .into_iter()
            .map(|(id, user_id, data)| {
                let data = data.and_then(|text| match serde_json::from_str(&text) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!("Knowledge base {} has unreadable data: {}", id, e);
                        None
                    }
                });
                KnowledgeBase { id, user_id, data }
            })
            .collect();
        Ok(kbs)
    }

    fn list_file_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM file")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    fn list_owned(&self, kind: EntityKind) -> Result<Vec<OwnedRow>> {
        let sql = format!("SELECT id, user_id FROM {} ORDER BY id", kind.table());
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(OwnedRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_owned(&self, kind: EntityKind, id: &str) -> Result<Option<OwnedRow>> {
        let sql = format!("SELECT id, user_id FROM {} WHERE id = ?1", kind.table());
        let row = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok(OwnedRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        let rows = self.conn.execute(&sql, params![id])?;
        Ok(rows > 0)
    }

    fn stream_json(
        &self,
        source: JsonSource,
        batch_size: usize,
        visit: &mut dyn FnMut(JsonRow),
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let fields = source.field_count();
        let mut stmt = self.conn.prepare(source.batch_query())?;
        let mut last_rowid: i64 = 0;
        let mut visited = 0;

        loop {
            let batch = stmt
                .query_map(params![last_rowid, batch_size as i64], |row| {
                    let rowid: i64 = row.get(0)?;
                    let mut values = Vec::with_capacity(fields);
                    for i in 0..fields {
                        values.push(row.get::<_, Option<String>>(2 + i)?);
                    }
                    Ok((
                        rowid,
                        JsonRow {
                            id: row.get(1)?,
                            fields: values,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let fetched = batch.len();
            if let Some((rowid, _)) = batch.last() {
                last_rowid = *rowid;
            }
            for (_, row) in batch {
                visit(row);
            }
            visited += fetched;

            if fetched < batch_size {
                break;
            }
        }

        Ok(visited)
    }

    fn vacuum(&self) -> Result<()> {
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }
}

impl SqliteStore {
    /// Insert or replace a user
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO user (id, email, role, last_active_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.role.as_str(), user.last_active_at],
        )?;
        Ok(())
    }

    /// Insert or replace a chat with its JSON body
    pub fn insert_chat(&self, chat: &Chat, body: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO chat (id, user_id, chat, updated_at, archived, pinned, folder_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id,
                chat.user_id,
                body.to_string(),
                chat.updated_at,
                chat.archived,
                chat.pinned,
                chat.folder_id
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a file record
    pub fn insert_file(&self, id: &str, user_id: &str, filename: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO file (id, user_id, filename) VALUES (?1, ?2, ?3)",
            params![id, user_id, filename],
        )?;
        Ok(())
    }

    /// Insert or replace a knowledge base
    pub fn insert_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let data = kb.data.as_ref().map(|v| v.to_string());
        self.conn.execute(
            "INSERT OR REPLACE INTO knowledge (id, user_id, data) VALUES (?1, ?2, ?3)",
            params![kb.id, kb.user_id, data],
        )?;
        Ok(())
    }

    /// Insert or replace a folder with its item list and data blob
    pub fn insert_folder(
        &self,
        id: &str,
        user_id: &str,
        items: Option<&serde_json::Value>,
        data: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO folder (id, user_id, items, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                user_id,
                items.map(|v| v.to_string()),
                data.map(|v| v.to_string())
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a channel message; `data` is stored verbatim
    pub fn insert_message(&self, id: &str, user_id: &str, data: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO message (id, user_id, data) VALUES (?1, ?2, ?3)",
            params![id, user_id, data],
        )?;
        Ok(())
    }

    /// Insert or replace a tool, function, prompt, model or note
    pub fn insert_owned(&self, kind: EntityKind, id: &str, user_id: &str, name: &str) -> Result<()> {
        match kind {
            EntityKind::Tool
            | EntityKind::Function
            | EntityKind::Prompt
            | EntityKind::Model
            | EntityKind::Note => {}
            other => {
                return Err(crate::error::PruneError::Config(format!(
                    "insert_owned does not handle {} rows",
                    other
                )))
            }
        }
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, user_id, name) VALUES (?1, ?2, ?3)",
            kind.table()
        );
        self.conn.execute(&sql, params![id, user_id, name])?;
        Ok(())
    }

    /// Insert an embedding row for the relational-extension vector backend
    pub fn insert_document_chunk(&self, id: &str, collection_name: &str, text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO document_chunk (id, collection_name, text) VALUES (?1, ?2, ?3)",
            params![id, collection_name, text],
        )?;
        Ok(())
    }
}
