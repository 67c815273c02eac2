use log::info;
use rusqlite::Connection;

use crate::error::ScrubResult;
use crate::rewriter::BTreePageRewriter;

/// One schema-catalog row whose root page moved during the rewrite.
#[derive(Debug, Clone)]
pub struct RootMapping {
    pub old_root: u32,
    pub new_root: u32,
    pub name: String,
    pub obj_type: String,
}

/// Enumerates all root pages from the source's schema catalog in a defined
/// order, rewrites each tree in turn, and records old -> new root-page
/// mappings for the catalog-update script that `Driver` runs at the end.
pub struct SchemaRelocator;

impl SchemaRelocator {
    /// Rewrite the schema b-tree itself (root page 1), then every object
    /// root it names, in the order the destination is expected to read
    /// them back in: indexes first, then tables, then anything else.
    pub fn relocate(
        src_conn: &Connection,
        rewriter: &mut BTreePageRewriter,
    ) -> ScrubResult<Vec<RootMapping>> {
        rewriter.rewrite(1, 0, true)?;

        let mut stmt = src_conn.prepare(
            "SELECT rootpage, name, type FROM sqlite_master \
             WHERE coalesce(rootpage, 0) > 0 \
             ORDER BY CASE type WHEN 'index' THEN 1 WHEN 'table' THEN 2 ELSE 0 END, rootpage",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let rootpage: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                let obj_type: String = row.get(2)?;
                Ok((rootpage as u32, name, obj_type))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut mappings = Vec::with_capacity(rows.len());
        for (old_root, name, obj_type) in rows {
            let new_root = rewriter.peek_next_dest_pgno();
            rewriter.rewrite(old_root, 0, true)?;
            info!("relocated {obj_type} '{name}': root page {old_root} -> {new_root}");
            mappings.push(RootMapping {
                old_root,
                new_root,
                name,
                obj_type,
            });
        }

        Ok(mappings)
    }

    /// Build the `writable_schema` SQL script that rewrites every moved
    /// root-page reference in the destination's own `sqlite_master`. Run
    /// by `Driver` against a freshly reopened connection on the
    /// destination, because the relocator itself only touches
    /// `sqlite_master`'s b-tree through the raw-page rewrite, and these
    /// variable-width catalog rows need a real UPDATE, not byte surgery.
    pub fn build_update_script(mappings: &[RootMapping]) -> String {
        let mut script = String::from("BEGIN EXCLUSIVE;\nPRAGMA writable_schema=on;\n");
        for m in mappings {
            script.push_str(&format!(
                "UPDATE sqlite_master SET rootpage={} WHERE rootpage={} AND name={} AND type={};\n",
                m.new_root,
                m.old_root,
                quote_sql_text(&m.name),
                quote_sql_text(&m.obj_type),
            ));
        }
        script.push_str("COMMIT;\nPRAGMA writable_schema=off;\n");
        script
    }
}

/// Quote a string as a single-quoted SQL text literal, doubling embedded
/// quotes (`sqlite3_mprintf("%Q", ...)`'s behavior).
fn quote_sql_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
