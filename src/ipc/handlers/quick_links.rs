use crate::defaults::DEFAULT_QUICK_LINKS;
use crate::ipc::helpers::{
    db_err, opt_i64, opt_str, opt_str_list, required_str, respond, scoped, HandlerErr,
};
use crate::ipc::types::{AppState, Request, SessionUser};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_links(conn: &Connection, user_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, url, sort_order
             FROM quick_links
             WHERE user_id = ?
             ORDER BY sort_order, rowid",
        )
        .map_err(db_err("db_query_failed", "quick_links"))?;
    let links = stmt
        .query_map([user_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "url": r.get::<_, String>(2)?,
                "order": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "quick_links"))?;
    Ok(links)
}

fn seed_defaults(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_insert_failed", "quick_links"))?;
    for link in &DEFAULT_QUICK_LINKS {
        tx.execute(
            "INSERT INTO quick_links(id, user_id, name, url, sort_order) VALUES(?, ?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), user_id, link.name, link.url, link.order),
        )
        .map_err(db_err("db_insert_failed", "quick_links"))?;
    }
    tx.commit()
        .map_err(db_err("db_insert_failed", "quick_links"))?;
    tracing::info!(user_id, "seeded default quick links");
    Ok(())
}

fn links_list(conn: &Connection, user: &SessionUser) -> Result<serde_json::Value, HandlerErr> {
    let mut links = load_links(conn, &user.id)?;
    if links.is_empty() {
        seed_defaults(conn, &user.id)?;
        links = load_links(conn, &user.id)?;
    }
    Ok(json!({ "links": links }))
}

fn links_create(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let url = required_str(params, "url")?;
    let max_order: Option<i64> = conn
        .query_row(
            "SELECT MAX(sort_order) FROM quick_links WHERE user_id = ?",
            [&user.id],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed", "quick_links"))?;
    let order = max_order.map_or(0, |m| m + 1);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO quick_links(id, user_id, name, url, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&id, &user.id, &name, &url, order),
    )
    .map_err(db_err("db_insert_failed", "quick_links"))?;
    Ok(json!({ "id": id, "name": name, "url": url, "order": order }))
}

fn owned_link(conn: &Connection, user_id: &str, id: &str) -> Result<(), HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM quick_links WHERE id = ? AND user_id = ?",
        (id, user_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map_err(db_err("db_query_failed", "quick_links"))?
    .map(|_| ())
    .ok_or_else(|| HandlerErr::not_found("quick link", id))
}

fn links_update(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    owned_link(conn, &user.id, &id)?;
    conn.execute(
        "UPDATE quick_links SET
            name = COALESCE(?, name),
            url = COALESCE(?, url),
            sort_order = COALESCE(?, sort_order)
         WHERE id = ?",
        (
            opt_str(params, "name"),
            opt_str(params, "url"),
            opt_i64(params, "order"),
            &id,
        ),
    )
    .map_err(db_err("db_update_failed", "quick_links"))?;
    let link = load_links(conn, &user.id)?
        .into_iter()
        .find(|l| l["id"] == id.as_str())
        .unwrap_or(serde_json::Value::Null);
    Ok(link)
}

/// Assigns orders 0..n following the given id list. Ids the user does not
/// own are ignored.
fn links_reorder(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(ids) = opt_str_list(params, "ids") else {
        return Err(HandlerErr::bad_params("missing ids"));
    };
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_update_failed", "quick_links"))?;
    for (order, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE quick_links SET sort_order = ? WHERE id = ? AND user_id = ?",
            (order as i64, id, &user.id),
        )
        .map_err(db_err("db_update_failed", "quick_links"))?;
    }
    tx.commit()
        .map_err(db_err("db_update_failed", "quick_links"))?;
    Ok(json!({ "links": load_links(conn, &user.id)? }))
}

fn links_delete(
    conn: &Connection,
    user: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    owned_link(conn, &user.id, &id)?;
    conn.execute("DELETE FROM quick_links WHERE id = ?", [&id])
        .map_err(db_err("db_delete_failed", "quick_links"))?;
    Ok(json!({ "success": true }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| links_list(conn, user));
    respond(req, result)
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| links_create(conn, user, &req.params));
    respond(req, result)
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| links_update(conn, user, &req.params));
    respond(req, result)
}

fn handle_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| links_reorder(conn, user, &req.params));
    respond(req, result)
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = scoped(state).and_then(|(conn, user)| links_delete(conn, user, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quickLinks.list" => Some(handle_list(state, req)),
        "quickLinks.create" => Some(handle_create(state, req)),
        "quickLinks.update" => Some(handle_update(state, req)),
        "quickLinks.reorder" => Some(handle_reorder(state, req)),
        "quickLinks.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
