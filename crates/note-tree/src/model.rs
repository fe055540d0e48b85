//! Tree and note data types.
//!
//! The JSON shape matches what the notes server stores and returns: camelCase
//! for tree fields (`rootId`, `isExpanded`), snake_case for note fields, and
//! integer flags for `deleted`, `pinned`, `shared` and `editorsize`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Reserved id of the single root item.
pub const ROOT_ID: &str = "root";

/// Declares a flag enum that travels as a small integer on the wire.
macro_rules! int_flag {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl From<$name> for u8 {
            fn from(flag: $name) -> u8 {
                match flag {
                    $($name::$variant => $value),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

int_flag! {
    /// Soft-delete state of a note.
    #[derive(Default)]
    NoteDeleted {
        #[default]
        Normal = 0,
        Deleted = 1,
    }
}

int_flag! {
    #[derive(Default)]
    NotePinned {
        #[default]
        Unpinned = 0,
        Pinned = 1,
    }
}

int_flag! {
    /// Whether a note is publicly shared.
    #[derive(Default)]
    NoteShared {
        #[default]
        Private = 0,
        Public = 1,
    }
}

int_flag! {
    /// Editor width preference. Absent (`null`) means "use the global setting".
    EditorSize {
        Small = 0,
        Large = 1,
    }
}

/// Everything known about a note except its body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Parent note id, `None` for notes directly under the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// RFC 3339 timestamp of the last edit. The only freshness signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted: NoteDeleted,
    #[serde(default)]
    pub shared: NoteShared,
    #[serde(default)]
    pub pinned: NotePinned,
    #[serde(default)]
    pub editorsize: Option<EditorSize>,
    #[serde(rename = "isDailyNote", default, skip_serializing_if = "Option::is_none")]
    pub is_daily_note: Option<bool>,
}

impl NoteMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted == NoteDeleted::Deleted
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned == NotePinned::Pinned
    }
}

/// A note with its body loaded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub meta: NoteMeta,
    pub content: String,
}

impl Note {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            meta: NoteMeta::new(id),
            content: content.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.meta.updated_at.as_deref()
    }

    /// Overlays `patch`, keeping fields the patch leaves out.
    pub fn merged(mut self, patch: NotePatch) -> Note {
        if let Some(content) = patch.apply_to(&mut self.meta) {
            self.content = content;
        }
        self
    }
}

/// Payload attached to a tree item.
///
/// The server sends metadata only; a body arrives later from the note cache or
/// a fetch. `Full` is tried first when decoding so that any object carrying a
/// `content` string is treated as loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemData {
    Full(Note),
    Metadata(NoteMeta),
}

impl ItemData {
    pub fn meta(&self) -> &NoteMeta {
        match self {
            ItemData::Full(note) => &note.meta,
            ItemData::Metadata(meta) => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NoteMeta {
        match self {
            ItemData::Full(note) => &mut note.meta,
            ItemData::Metadata(meta) => meta,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            ItemData::Full(note) => Some(&note.content),
            ItemData::Metadata(_) => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ItemData::Full(_))
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.meta().updated_at.as_deref()
    }

    pub fn into_meta(self) -> NoteMeta {
        match self {
            ItemData::Full(note) => note.meta,
            ItemData::Metadata(meta) => meta,
        }
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            ItemData::Full(note) => Some(note),
            ItemData::Metadata(_) => None,
        }
    }

    /// Overlays `patch` on this payload. Patch fields win; absent fields keep
    /// their current value. A patch carrying `content` upgrades metadata to a
    /// full note.
    pub fn merged(self, patch: NotePatch) -> ItemData {
        let (mut meta, content) = match self {
            ItemData::Full(note) => (note.meta, Some(note.content)),
            ItemData::Metadata(meta) => (meta, None),
        };
        let patch_content = patch.apply_to(&mut meta);
        match patch_content.or(content) {
            Some(content) => ItemData::Full(Note { meta, content }),
            None => ItemData::Metadata(meta),
        }
    }
}

impl From<Note> for ItemData {
    fn from(note: Note) -> Self {
        ItemData::Full(note)
    }
}

impl From<NoteMeta> for ItemData {
    fn from(meta: NoteMeta) -> Self {
        ItemData::Metadata(meta)
    }
}

/// Partial note used for merges. Every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<NoteDeleted>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<NoteShared>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<NotePinned>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editorsize: Option<EditorSize>,
    #[serde(rename = "isDailyNote", default, skip_serializing_if = "Option::is_none")]
    pub is_daily_note: Option<bool>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        *self == NotePatch::default()
    }

    /// Writes the metadata fields into `meta` and hands back the content.
    fn apply_to(self, meta: &mut NoteMeta) -> Option<String> {
        if let Some(id) = self.id {
            meta.id = id;
        }
        if let Some(title) = self.title {
            meta.title = title;
        }
        if self.pid.is_some() {
            meta.pid = self.pid;
        }
        if self.pic.is_some() {
            meta.pic = self.pic;
        }
        if self.date.is_some() {
            meta.date = self.date;
        }
        if self.updated_at.is_some() {
            meta.updated_at = self.updated_at;
        }
        if let Some(deleted) = self.deleted {
            meta.deleted = deleted;
        }
        if let Some(shared) = self.shared {
            meta.shared = shared;
        }
        if let Some(pinned) = self.pinned {
            meta.pinned = pinned;
        }
        if self.editorsize.is_some() {
            meta.editorsize = self.editorsize;
        }
        if self.is_daily_note.is_some() {
            meta.is_daily_note = self.is_daily_note;
        }
        self.content
    }
}

impl From<NoteMeta> for NotePatch {
    fn from(meta: NoteMeta) -> Self {
        Self {
            id: Some(meta.id),
            title: Some(meta.title),
            pid: meta.pid,
            content: None,
            pic: meta.pic,
            date: meta.date,
            updated_at: meta.updated_at,
            deleted: Some(meta.deleted),
            shared: Some(meta.shared),
            pinned: Some(meta.pinned),
            editorsize: meta.editorsize,
            is_daily_note: meta.is_daily_note,
        }
    }
}

impl From<Note> for NotePatch {
    fn from(note: Note) -> Self {
        Self {
            content: Some(note.content),
            ..NotePatch::from(note.meta)
        }
    }
}

/// Partial tree item used by `mutate_item`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(rename = "isExpanded", default, skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NotePatch>,
}

impl ItemPatch {
    pub fn expanded(is_expanded: bool) -> Self {
        Self {
            is_expanded: Some(is_expanded),
            ..Default::default()
        }
    }

    pub fn data(data: impl Into<NotePatch>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// True when the patch touches structure or view state, not note data.
    pub fn has_structural_fields(&self) -> bool {
        self.is_expanded.is_some() || self.children.is_some()
    }
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeItem {
    pub id: String,
    #[serde(default, deserialize_with = "child_slots")]
    pub children: Vec<String>,
    #[serde(rename = "isExpanded", default, skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemData>,
}

impl TreeItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
            is_expanded: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<ItemData>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.data.as_ref().is_some_and(ItemData::is_loaded)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.data.as_ref().and_then(ItemData::updated_at)
    }
}

/// Stored trees may contain `null` child slots; they decode as empty ids and
/// are dropped by repair.
fn child_slots<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let slots: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(slots
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

fn default_root_id() -> String {
    ROOT_ID.to_string()
}

/// A note tree: an arena of items keyed by id plus the id of the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    #[serde(rename = "rootId", default = "default_root_id")]
    pub root_id: String,
    #[serde(default)]
    pub items: BTreeMap<String, TreeItem>,
}

impl Default for TreeModel {
    /// A tree holding only an empty root.
    fn default() -> Self {
        let mut items = BTreeMap::new();
        items.insert(ROOT_ID.to_string(), TreeItem::new(ROOT_ID));
        Self {
            root_id: ROOT_ID.to_string(),
            items,
        }
    }
}

impl TreeModel {
    pub fn get(&self, id: &str) -> Option<&TreeItem> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn root(&self) -> Option<&TreeItem> {
        self.items.get(&self.root_id)
    }

    /// Id of the item whose children list contains `id`.
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.items
            .values()
            .find(|item| item.children.iter().any(|child| child == id))
            .map(|item| item.id.as_str())
    }

    /// Inserts an item, replacing any previous one with the same id.
    pub fn insert(&mut self, item: TreeItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_tree_has_only_root() {
        let tree = TreeModel::default();
        assert_eq!(tree.root_id, ROOT_ID);
        assert_eq!(tree.len(), 1);
        assert!(tree.root().is_some_and(|root| root.children.is_empty()));
    }

    #[test]
    fn decode_server_tree() {
        let raw = json!({
            "rootId": "root",
            "items": {
                "root": { "id": "root", "children": ["a"] },
                "a": {
                    "id": "a",
                    "children": [],
                    "isExpanded": true,
                    "data": {
                        "id": "a",
                        "title": "First",
                        "updated_at": "2024-01-01T00:00:00.000Z",
                        "deleted": 0,
                        "pinned": 1,
                        "shared": 0,
                        "editorsize": null
                    }
                }
            }
        });

        let tree: TreeModel = serde_json::from_value(raw).unwrap();
        let a = tree.get("a").unwrap();
        assert_eq!(a.is_expanded, Some(true));
        assert!(!a.is_loaded());

        let meta = a.data.as_ref().unwrap().meta();
        assert_eq!(meta.title, "First");
        assert!(meta.is_pinned());
        assert_eq!(meta.editorsize, None);
    }

    #[test]
    fn data_with_content_decodes_as_full_note() {
        let raw = json!({ "id": "a", "title": "T", "content": "# hi", "deleted": 1 });
        let data: ItemData = serde_json::from_value(raw).unwrap();

        assert_eq!(data.content(), Some("# hi"));
        assert!(data.meta().is_deleted());
    }

    #[test]
    fn null_children_decode_as_empty_slots() {
        let raw = json!({ "id": "x", "children": ["a", null, "b"] });
        let item: TreeItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.children, vec!["a", "", "b"]);

        let raw = json!({ "id": "y", "children": null });
        let item: TreeItem = serde_json::from_value(raw).unwrap();
        assert!(item.children.is_empty());
    }

    #[test]
    fn flags_encode_as_integers() {
        let mut note = Note::new("a", "body");
        note.meta.deleted = NoteDeleted::Deleted;
        note.meta.editorsize = Some(EditorSize::Large);

        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["deleted"], json!(1));
        assert_eq!(value["pinned"], json!(0));
        assert_eq!(value["editorsize"], json!(1));
        assert_eq!(value["content"], json!("body"));
    }

    #[test]
    fn unknown_flag_value_is_rejected() {
        let raw = json!({ "id": "a", "deleted": 7 });
        assert!(serde_json::from_value::<NoteMeta>(raw).is_err());
    }

    #[test]
    fn merge_patch_keeps_absent_fields() {
        let mut meta = NoteMeta::new("a");
        meta.title = "Old".into();
        meta.updated_at = Some("t1".into());

        let merged = ItemData::Metadata(meta).merged(NotePatch {
            title: Some("New".into()),
            ..Default::default()
        });

        assert!(!merged.is_loaded());
        assert_eq!(merged.meta().title, "New");
        assert_eq!(merged.updated_at(), Some("t1"));
    }

    #[test]
    fn merge_patch_with_content_loads_note() {
        let patch = NotePatch::from(Note::new("a", "body"));
        let merged = ItemData::Metadata(NoteMeta::new("a")).merged(patch);
        assert_eq!(merged.content(), Some("body"));

        let kept = merged.merged(NotePatch {
            pinned: Some(NotePinned::Pinned),
            ..Default::default()
        });
        assert_eq!(kept.content(), Some("body"));
        assert!(kept.meta().is_pinned());
    }

    #[test]
    fn parent_lookup() {
        let mut tree = TreeModel::default();
        tree.insert(TreeItem::new("a"));
        if let Some(root) = tree.items.get_mut(ROOT_ID) {
            root.children.push("a".into());
        }

        assert_eq!(tree.parent_of("a"), Some(ROOT_ID));
        assert_eq!(tree.parent_of(ROOT_ID), None);
    }
}
