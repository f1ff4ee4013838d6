// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};

use super::models::{TodoItem, TodoStatus, TodoStore};
use super::storage::{now_iso, today_date, TodoStorage};

/// Stateful TODO operations backed by markdown storage.
///
/// Every mutation validates the dependency DAG before persisting, so the
/// on-disk store never holds a cycle or a dangling reference between active
/// items.
pub struct TodoService {
    storage: TodoStorage,
}

impl TodoService {
    pub fn new(workspace: &Path) -> Self {
        Self { storage: TodoStorage::new(workspace) }
    }

    /// Dispatch one action and return the structured envelope.
    pub fn handle(&self, action: &str, args: &Value) -> Value {
        let action = action.trim().to_lowercase();
        let result = match action.as_str() {
            "init" => self.action_init(),
            "add" => self.action_add(args),
            "list" => self.action_list(args),
            "update" => self.action_update(args),
            "bulk_update" => self.action_bulk_update(args),
            "move" => self.action_move(args),
            "done" => self.action_done(args),
            "remove" => self.action_remove(args),
            "bulk_remove" => self.action_bulk_remove(args),
            "archive" => self.action_archive(args),
            "reorder" => self.action_reorder(args),
            "stats" => self.action_stats(),
            "review_daily" => self.action_review_daily(),
            other => Err(format!("Unsupported action: {other}")),
        };

        match result {
            Ok(output) => json!({
                "ok": true,
                "action": action,
                "summary": output.summary,
                "items": output.items,
                "stats": output.stats,
                "errors": [],
            }),
            Err(message) => json!({
                "ok": false,
                "action": action,
                "summary": message,
                "items": [],
                "stats": {},
                "errors": [message],
            }),
        }
    }

    fn action_init(&self) -> Result<ActionOutput, String> {
        let store = if self.storage.todo_path.exists() {
            self.storage.load_store()?
        } else {
            self.storage.init_store()?
        };
        self.storage.ensure_auto_review_block()?;
        Ok(ActionOutput {
            summary: "TODO store initialized and daily review block ensured.".to_string(),
            items: vec![],
            stats: compute_stats(&store),
        })
    }

    fn action_add(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let now = now_iso();

        let title = normalize_title(args.get("title"))?;
        let status = match args.get("status").and_then(Value::as_str) {
            Some(s) => TodoStatus::parse(s)?,
            None => TodoStatus::Todo,
        };
        let priority = normalize_priority(args.get("priority").unwrap_or(&json!(2)))?;
        let due = normalize_due(args.get("due"))?;
        let tags = normalize_string_list(args.get("tags"))?;
        let depends_on = normalize_id_list(args.get("depends_on"), "depends_on")?;

        let id = next_id(&store);
        let item = TodoItem {
            id: id.clone(),
            title,
            status,
            priority,
            note: args
                .get("note")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            due,
            tags,
            depends_on,
            created_at: now.clone(),
            updated_at: now.clone(),
            completed_at: (status == TodoStatus::Done).then(|| now.clone()),
        };

        // Acyclicity is probed on a temporary copy so a bad add leaves the
        // store untouched.
        let mut probe = store.items.clone();
        probe.push(item.clone());
        validate_dependencies(&probe)?;

        store.items.push(item.clone());
        store.meta.last_id = id[1..].parse().unwrap_or(store.meta.last_id + 1);
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Added task {id}."),
            items: vec![public_item(&item)],
            stats: compute_stats(&store),
        })
    }

    fn action_list(&self, args: &Value) -> Result<ActionOutput, String> {
        let store = self.storage.load_or_init_store()?;
        let filtered = apply_filters(&store.items, args.get("filters").unwrap_or(&Value::Null))?;
        let mut ordered = sort_items(
            filtered,
            args.get("sort_by").and_then(Value::as_str),
            args.get("sort_order").and_then(Value::as_str),
        )?;

        if let Some(limit) = args.get("limit").and_then(Value::as_i64) {
            if limit < 1 {
                return Err("limit must be >= 1".to_string());
            }
            ordered.truncate(limit as usize);
        }

        Ok(ActionOutput {
            summary: format!("Listed {} task(s).", ordered.len()),
            items: ordered.iter().map(public_item).collect(),
            stats: compute_stats(&store),
        })
    }

    fn action_update(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let id = normalize_id(args.get("id"), "id")?;
        let patch = normalize_patch(args.get("patch"))?;

        let updated = update_single_item(&mut store, &id, &patch)?;
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Updated task {id}."),
            items: vec![public_item(&updated)],
            stats: compute_stats(&store),
        })
    }

    fn action_bulk_update(&self, args: &Value) -> Result<ActionOutput, String> {
        let ids = normalize_id_list(args.get("ids"), "ids")?;
        if ids.is_empty() {
            return Err("ids is required for bulk_update".to_string());
        }
        let patch = normalize_patch(args.get("patch"))?;

        let mut store = self.storage.load_or_init_store()?;
        let mut updated = Vec::new();
        for id in &ids {
            updated.push(update_single_item(&mut store, id, &patch)?);
        }
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Updated {} task(s).", updated.len()),
            items: updated.iter().map(public_item).collect(),
            stats: compute_stats(&store),
        })
    }

    fn action_move(&self, args: &Value) -> Result<ActionOutput, String> {
        let Some(status) = args.get("status").and_then(Value::as_str) else {
            return Err("status is required for move".to_string());
        };
        let patched = json!({"id": args.get("id"), "patch": {"status": status}});
        self.action_update(&patched)
    }

    fn action_done(&self, args: &Value) -> Result<ActionOutput, String> {
        let patched = json!({"id": args.get("id"), "patch": {"status": "done"}});
        self.action_update(&patched)
    }

    fn action_remove(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let id = normalize_id(args.get("id"), "id")?;
        if !store.items.iter().any(|i| i.id == id) {
            return Err(format!("Task not found: {id}"));
        }

        let mut targets = BTreeSet::new();
        targets.insert(id.clone());
        let conflicts = find_external_dependents(&store, &targets);
        if let Some(users) = conflicts.get(&id) {
            return Err(format!(
                "Cannot remove {id}: depended on by active task(s): {}.",
                users.join(", ")
            ));
        }

        store.items.retain(|i| i.id != id);
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Removed task {id}."),
            items: vec![json!({"id": id})],
            stats: compute_stats(&store),
        })
    }

    fn action_bulk_remove(&self, args: &Value) -> Result<ActionOutput, String> {
        let ids: BTreeSet<String> = normalize_id_list(args.get("ids"), "ids")?.into_iter().collect();
        if ids.is_empty() {
            return Err("ids is required for bulk_remove".to_string());
        }

        let mut store = self.storage.load_or_init_store()?;
        let existing: HashSet<&str> = store.items.iter().map(|i| i.id.as_str()).collect();
        let missing: Vec<&String> = ids.iter().filter(|id| !existing.contains(id.as_str())).collect();
        if !missing.is_empty() {
            let rendered: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
            return Err(format!("Task(s) not found: {}", rendered.join(", ")));
        }

        let conflicts = find_external_dependents(&store, &ids);
        if !conflicts.is_empty() {
            let parts: Vec<String> = conflicts
                .iter()
                .map(|(dep, users)| format!("{dep} <- {}", users.join(", ")))
                .collect();
            return Err(format!(
                "Cannot bulk remove due to active dependencies: {}",
                parts.join("; ")
            ));
        }

        store.items.retain(|i| !ids.contains(&i.id));
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Removed {} task(s).", ids.len()),
            items: ids.iter().map(|id| json!({"id": id})).collect(),
            stats: compute_stats(&store),
        })
    }

    fn action_archive(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let now = now_iso();
        let mut archived = Vec::new();

        let ids = normalize_id_list(args.get("ids"), "ids")?;
        if !ids.is_empty() {
            for id in &ids {
                let Some(item) = store.items.iter_mut().find(|i| &i.id == id) else {
                    return Err(format!("Task not found: {id}"));
                };
                if item.status != TodoStatus::Done {
                    return Err(format!("Only done tasks can be archived: {id}"));
                }
                item.status = TodoStatus::Archived;
                item.updated_at = now.clone();
                archived.push(item.clone());
            }
        } else {
            // Filters always scope to done items.
            let mut filters = args.get("filters").cloned().unwrap_or_else(|| json!({}));
            filters["statuses"] = json!(["done"]);
            let candidates: Vec<String> = apply_filters(&store.items, &filters)?
                .iter()
                .map(|i| i.id.clone())
                .collect();
            for id in candidates {
                if let Some(item) = store.items.iter_mut().find(|i| i.id == id) {
                    if item.status == TodoStatus::Done {
                        item.status = TodoStatus::Archived;
                        item.updated_at = now.clone();
                        archived.push(item.clone());
                    }
                }
            }
        }

        if archived.is_empty() {
            return Ok(ActionOutput {
                summary: "No tasks archived.".to_string(),
                items: vec![],
                stats: compute_stats(&store),
            });
        }

        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;
        Ok(ActionOutput {
            summary: format!("Archived {} task(s).", archived.len()),
            items: archived.iter().map(public_item).collect(),
            stats: compute_stats(&store),
        })
    }

    fn action_reorder(&self, args: &Value) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let sort_by = args.get("sort_by").and_then(Value::as_str).unwrap_or("priority");
        let sort_order = args.get("sort_order").and_then(Value::as_str).unwrap_or("asc");
        store.items = sort_items(store.items.clone(), Some(sort_by), Some(sort_order))?;
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary: format!("Reordered {} task(s).", store.items.len()),
            items: store.items.iter().take(20).map(public_item).collect(),
            stats: compute_stats(&store),
        })
    }

    fn action_stats(&self) -> Result<ActionOutput, String> {
        let store = self.storage.load_or_init_store()?;
        Ok(ActionOutput {
            summary: "Computed task statistics.".to_string(),
            items: vec![],
            stats: compute_stats(&store),
        })
    }

    fn action_review_daily(&self) -> Result<ActionOutput, String> {
        let mut store = self.storage.load_or_init_store()?;
        let today = today_date();
        if store.meta.last_review_date.as_deref() == Some(today.as_str()) {
            return Ok(ActionOutput {
                summary: "Daily review already completed today.".to_string(),
                items: vec![],
                stats: compute_stats(&store),
            });
        }

        let open: Vec<TodoItem> = store
            .items
            .iter()
            .filter(|i| i.status.is_open())
            .cloned()
            .collect();
        let ranked: Vec<TodoItem> = sort_items(open, Some("priority"), Some("asc"))?
            .into_iter()
            .take(5)
            .collect();
        let stats = compute_stats(&store);
        let focus = if ranked.is_empty() {
            "none".to_string()
        } else {
            ranked.iter().map(|i| i.id.clone()).collect::<Vec<_>>().join(", ")
        };
        let summary = format!(
            "Daily review: {} total, {} open, {} overdue, top focus: {focus}",
            stats["total"], stats["open"], stats["overdue"]
        );

        store.meta.last_review_date = Some(today);
        store.meta.last_review_summary = Some(summary.clone());
        store.meta.updated_at = now_iso();
        self.storage.save_store(&store)?;

        Ok(ActionOutput {
            summary,
            items: ranked.iter().map(public_item).collect(),
            stats,
        })
    }
}

struct ActionOutput {
    summary: String,
    items: Vec<Value>,
    stats: Value,
}

fn update_single_item(
    store: &mut TodoStore,
    id: &str,
    patch: &serde_json::Map<String, Value>,
) -> Result<TodoItem, String> {
    const ALLOWED: [&str; 7] = ["title", "note", "status", "priority", "due", "tags", "depends_on"];
    let unknown: Vec<&String> = patch.keys().filter(|k| !ALLOWED.contains(&k.as_str())).collect();
    if !unknown.is_empty() {
        let rendered: Vec<String> = unknown.iter().map(|s| s.to_string()).collect();
        return Err(format!("Unsupported patch field(s): {}", rendered.join(", ")));
    }

    let index = store
        .items
        .iter()
        .position(|i| i.id == id)
        .ok_or_else(|| format!("Task not found: {id}"))?;

    let mut item = store.items[index].clone();
    if let Some(title) = patch.get("title") {
        item.title = normalize_title(Some(title))?;
    }
    if let Some(note) = patch.get("note") {
        item.note = note.as_str().unwrap_or_default().trim().to_string();
    }
    if let Some(priority) = patch.get("priority") {
        item.priority = normalize_priority(priority)?;
    }
    if let Some(due) = patch.get("due") {
        item.due = normalize_due(Some(due))?;
    }
    if let Some(tags) = patch.get("tags") {
        item.tags = normalize_string_list(Some(tags))?;
    }
    if let Some(deps) = patch.get("depends_on") {
        item.depends_on = normalize_id_list(Some(deps), "depends_on")?;
    }
    if let Some(status) = patch.get("status") {
        item.status = TodoStatus::parse(status.as_str().unwrap_or_default())?;
    }

    item.updated_at = now_iso();
    if item.status == TodoStatus::Done && item.completed_at.is_none() {
        item.completed_at = Some(item.updated_at.clone());
    }
    if item.status.is_open() {
        item.completed_at = None;
    }

    let mut probe = store.items.clone();
    probe[index] = item.clone();
    validate_dependencies(&probe)?;

    store.items[index] = item.clone();
    Ok(item)
}

/// Self-references, dangling references, and cycles over the active
/// (non-archived) subset are all rejected.
fn validate_dependencies(items: &[TodoItem]) -> Result<(), String> {
    let ids: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    for item in items {
        for dep in &item.depends_on {
            if dep == &item.id {
                return Err(format!("Task cannot depend on itself: {}", item.id));
            }
            if !ids.contains(dep.as_str()) {
                return Err(format!("Dependency not found for {}: {dep}", item.id));
            }
        }
    }

    let active: HashSet<&str> = items
        .iter()
        .filter(|i| i.status != TodoStatus::Archived)
        .map(|i| i.id.as_str())
        .collect();
    let graph: HashMap<&str, Vec<&str>> = items
        .iter()
        .filter(|i| i.status != TodoStatus::Archived)
        .map(|i| {
            let deps: Vec<&str> = i
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| active.contains(d))
                .collect();
            (i.id.as_str(), deps)
        })
        .collect();

    // DFS coloring: 0 unvisited, 1 on stack, 2 done.
    let mut state: HashMap<&str, u8> = HashMap::new();
    fn dfs<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, Vec<&'a str>>,
        state: &mut HashMap<&'a str, u8>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), String> {
        state.insert(node, 1);
        stack.push(node);
        for next in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
            match state.get(next).copied().unwrap_or(0) {
                0 => dfs(next, graph, state, stack)?,
                1 => {
                    let mut cycle: Vec<&str> = stack.clone();
                    cycle.push(next);
                    return Err(format!("Dependency cycle detected: {}", cycle.join(" -> ")));
                }
                _ => {}
            }
        }
        stack.pop();
        state.insert(node, 2);
        Ok(())
    }

    let mut nodes: Vec<&str> = graph.keys().copied().collect();
    nodes.sort();
    for node in nodes {
        if state.get(node).copied().unwrap_or(0) == 0 {
            dfs(node, &graph, &mut state, &mut Vec::new())?;
        }
    }
    Ok(())
}

fn find_external_dependents(
    store: &TodoStore,
    targets: &BTreeSet<String>,
) -> BTreeMap<String, Vec<String>> {
    let mut conflicts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &store.items {
        if item.status == TodoStatus::Archived || targets.contains(&item.id) {
            continue;
        }
        for dep in &item.depends_on {
            if targets.contains(dep) {
                conflicts.entry(dep.clone()).or_default().push(item.id.clone());
            }
        }
    }
    for users in conflicts.values_mut() {
        users.sort();
    }
    conflicts
}

fn compute_stats(store: &TodoStore) -> Value {
    let mut by_status: BTreeMap<&str, usize> = TodoStatus::ALL
        .iter()
        .map(|s| (s.as_str(), 0usize))
        .collect();
    let mut priority_dist: BTreeMap<String, usize> =
        (1..=4).map(|p| (p.to_string(), 0usize)).collect();
    let now = chrono::Local::now().naive_local();
    let mut overdue = 0usize;

    for item in &store.items {
        *by_status.entry(item.status.as_str()).or_default() += 1;
        if item.status.is_open() && is_overdue(item, now) {
            overdue += 1;
        }
        if item.status != TodoStatus::Archived {
            *priority_dist.entry(item.priority.to_string()).or_default() += 1;
        }
    }

    let open = by_status["todo"] + by_status["doing"] + by_status["blocked"];
    json!({
        "total": store.items.len(),
        "open": open,
        "overdue": overdue,
        "by_status": by_status,
        "priority_distribution": priority_dist,
        "last_review_date": store.meta.last_review_date,
        "last_review_summary": store.meta.last_review_summary,
    })
}

fn is_overdue(item: &TodoItem, now: NaiveDateTime) -> bool {
    if !item.status.is_open() {
        return false;
    }
    match &item.due {
        Some(due) => parse_due_datetime(due).map(|d| d < now).unwrap_or(false),
        None => false,
    }
}

fn apply_filters(items: &[TodoItem], filters: &Value) -> Result<Vec<TodoItem>, String> {
    let mut result: Vec<TodoItem> = items.to_vec();
    if filters.is_null() {
        result.retain(|i| i.status != TodoStatus::Archived);
        return Ok(result);
    }

    let include_archived = filters["include_archived"].as_bool().unwrap_or(false);
    let statuses = filters.get("statuses");
    let status_set: Option<HashSet<TodoStatus>> = match statuses {
        Some(Value::Array(list)) => {
            let mut set = HashSet::new();
            for entry in list {
                set.insert(TodoStatus::parse(entry.as_str().unwrap_or_default())?);
            }
            Some(set)
        }
        Some(Value::Null) | None => None,
        Some(_) => return Err("filters.statuses must be a list".to_string()),
    };

    match &status_set {
        Some(set) => result.retain(|i| set.contains(&i.status)),
        None if !include_archived => result.retain(|i| i.status != TodoStatus::Archived),
        None => {}
    }

    let tags_any = normalize_string_list(filters.get("tags_any"))?;
    if !tags_any.is_empty() {
        result.retain(|i| i.tags.iter().any(|t| tags_any.contains(t)));
    }
    let tags_all = normalize_string_list(filters.get("tags_all"))?;
    if !tags_all.is_empty() {
        result.retain(|i| tags_all.iter().all(|t| i.tags.contains(t)));
    }

    let keyword = filters["keyword"].as_str().unwrap_or_default().trim().to_lowercase();
    if !keyword.is_empty() {
        result.retain(|i| {
            i.id.to_lowercase().contains(&keyword)
                || i.title.to_lowercase().contains(&keyword)
                || i.note.to_lowercase().contains(&keyword)
        });
    }

    if let Some(pmin) = filters.get("priority_min").filter(|v| !v.is_null()) {
        let pmin = normalize_priority(pmin)?;
        result.retain(|i| i.priority >= pmin);
    }
    if let Some(pmax) = filters.get("priority_max").filter(|v| !v.is_null()) {
        let pmax = normalize_priority(pmax)?;
        result.retain(|i| i.priority <= pmax);
    }

    if let Some(before) = filters["due_before"].as_str() {
        let cutoff = parse_due_datetime(before)?;
        result.retain(|i| {
            i.due
                .as_deref()
                .and_then(|d| parse_due_datetime(d).ok())
                .map(|d| d <= cutoff)
                .unwrap_or(false)
        });
    }
    if let Some(after) = filters["due_after"].as_str() {
        let cutoff = parse_due_datetime(after)?;
        result.retain(|i| {
            i.due
                .as_deref()
                .and_then(|d| parse_due_datetime(d).ok())
                .map(|d| d >= cutoff)
                .unwrap_or(false)
        });
    }

    if let Some(flag) = filters.get("overdue").and_then(Value::as_bool) {
        let now = chrono::Local::now().naive_local();
        result.retain(|i| is_overdue(i, now) == flag);
    }

    Ok(result)
}

fn sort_items(
    items: Vec<TodoItem>,
    sort_by: Option<&str>,
    sort_order: Option<&str>,
) -> Result<Vec<TodoItem>, String> {
    let Some(sort_by) = sort_by else {
        return Ok(items);
    };
    let key_name = sort_by.trim().to_lowercase();
    if !matches!(key_name.as_str(), "priority" | "due" | "created" | "updated") {
        return Err("sort_by must be one of: priority, due, created, updated".to_string());
    }
    let order = sort_order.unwrap_or("asc").trim().to_lowercase();
    if !matches!(order.as_str(), "asc" | "desc") {
        return Err("sort_order must be one of: asc, desc".to_string());
    }

    let ts = |text: &str| parse_general_datetime(text).map(|d| d.and_utc().timestamp()).unwrap_or(0);
    let due_ts = |item: &TodoItem| {
        item.due
            .as_deref()
            .and_then(|d| parse_due_datetime(d).ok())
            .map(|d| d.and_utc().timestamp())
            .unwrap_or(i64::MAX)
    };

    let mut sorted = items;
    sorted.sort_by(|a, b| {
        let key = match key_name.as_str() {
            "priority" => (a.priority as i64, due_ts(a), ts(&a.created_at)).cmp(&(
                b.priority as i64,
                due_ts(b),
                ts(&b.created_at),
            )),
            "due" => (due_ts(a), a.priority as i64, ts(&a.created_at)).cmp(&(
                due_ts(b),
                b.priority as i64,
                ts(&b.created_at),
            )),
            "created" => ts(&a.created_at).cmp(&ts(&b.created_at)),
            _ => ts(&a.updated_at).cmp(&ts(&b.updated_at)),
        };
        key
    });
    if order == "desc" {
        sorted.reverse();
    }
    Ok(sorted)
}

fn next_id(store: &TodoStore) -> String {
    let existing: HashSet<&str> = store.items.iter().map(|i| i.id.as_str()).collect();
    let mut next = store.meta.last_id.max(0) + 1;
    loop {
        let candidate = format!("T{next:04}");
        if !existing.contains(candidate.as_str()) {
            return candidate;
        }
        next += 1;
    }
}

fn public_item(item: &TodoItem) -> Value {
    let now = chrono::Local::now().naive_local();
    json!({
        "id": item.id,
        "title": item.title,
        "status": item.status.as_str(),
        "priority": item.priority,
        "due": item.due,
        "tags": item.tags,
        "depends_on": item.depends_on,
        "note": item.note,
        "created_at": item.created_at,
        "updated_at": item.updated_at,
        "completed_at": item.completed_at,
        "overdue": is_overdue(item, now),
    })
}

fn normalize_title(title: Option<&Value>) -> Result<String, String> {
    let text = title.and_then(Value::as_str).unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err("title is required".to_string());
    }
    Ok(text)
}

fn normalize_priority(priority: &Value) -> Result<u8, String> {
    let value = priority
        .as_i64()
        .ok_or("priority must be an integer in range 1..4")?;
    if !(1..=4).contains(&value) {
        return Err("priority must be an integer in range 1..4".to_string());
    }
    Ok(value as u8)
}

fn normalize_due(due: Option<&Value>) -> Result<Option<String>, String> {
    let Some(due) = due else { return Ok(None) };
    if due.is_null() {
        return Ok(None);
    }
    let text = due.as_str().unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed = parse_due_datetime(&text)?;
    if NaiveDate::parse_from_str(&text, "%Y-%m-%d").is_ok() {
        return Ok(Some(text));
    }
    Ok(Some(parsed.format("%Y-%m-%dT%H:%M:%S").to_string()))
}

fn normalize_string_list(values: Option<&Value>) -> Result<Vec<String>, String> {
    let Some(values) = values else { return Ok(Vec::new()) };
    if values.is_null() {
        return Ok(Vec::new());
    }
    let Some(list) = values.as_array() else {
        return Err("Expected a list of strings".to_string());
    };
    let mut result = Vec::new();
    let mut seen = HashSet::new();
    for value in list {
        let Some(text) = value.as_str() else {
            return Err("Expected a list of strings".to_string());
        };
        let clean = text.trim().to_string();
        if clean.is_empty() || !seen.insert(clean.clone()) {
            continue;
        }
        result.push(clean);
    }
    Ok(result)
}

fn normalize_id(value: Option<&Value>, field: &str) -> Result<String, String> {
    let text = value
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    if text.is_empty() {
        return Err(format!("{field} is required"));
    }
    let valid = text.len() >= 5
        && text.starts_with('T')
        && text[1..].chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(format!("{field} must match pattern T####"));
    }
    Ok(text)
}

fn normalize_id_list(values: Option<&Value>, field: &str) -> Result<Vec<String>, String> {
    let Some(values) = values else { return Ok(Vec::new()) };
    if values.is_null() {
        return Ok(Vec::new());
    }
    let Some(list) = values.as_array() else {
        return Err(format!("{field} must be a list"));
    };
    let mut result = Vec::new();
    let mut seen = HashSet::new();
    for value in list {
        let id = normalize_id(Some(value), field)?;
        if seen.insert(id.clone()) {
            result.push(id);
        }
    }
    Ok(result)
}

fn normalize_patch(patch: Option<&Value>) -> Result<serde_json::Map<String, Value>, String> {
    let Some(patch) = patch else {
        return Err("patch is required".to_string());
    };
    let Some(map) = patch.as_object() else {
        return Err("patch must be an object".to_string());
    };
    if map.is_empty() {
        return Err("patch must not be empty".to_string());
    }
    Ok(map.clone())
}

fn parse_due_datetime(text: &str) -> Result<NaiveDateTime, String> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap()));
    }
    parse_general_datetime(text)
}

fn parse_general_datetime(text: &str) -> Result<NaiveDateTime, String> {
    let text = text.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    Err(format!("invalid datetime: {text}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
