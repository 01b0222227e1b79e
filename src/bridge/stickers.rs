use std::collections::HashMap;

/// Bidirectional index between QQ face ids and Telegram sticker document
/// handles, built at startup from the configured sticker packs.
#[derive(Debug, Clone, Default)]
pub struct StickerIndex {
    by_face: HashMap<i32, String>,
    by_handle: HashMap<String, i32>,
}

impl StickerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (i32, String)>) -> Self {
        let mut index = Self::default();
        for (face_id, handle) in pairs {
            index.register(face_id, handle);
        }
        index
    }

    pub fn register(&mut self, face_id: i32, handle: String) {
        self.by_handle.insert(handle.clone(), face_id);
        self.by_face.insert(face_id, handle);
    }

    /// Native sticker handle matching a face id, if the packs cover it.
    pub fn sticker_for_face(&self, face_id: i32) -> Option<&str> {
        self.by_face.get(&face_id).map(String::as_str)
    }

    /// Reverse lookup for the Telegram-to-QQ direction.
    pub fn face_for_sticker(&self, handle: &str) -> Option<i32> {
        self.by_handle.get(handle).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_face.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_bidirectional() {
        let index = StickerIndex::from_pairs([(14, "doc-14".to_string())]);
        assert_eq!(index.sticker_for_face(14), Some("doc-14"));
        assert_eq!(index.face_for_sticker("doc-14"), Some(14));
        assert_eq!(index.sticker_for_face(15), None);
        assert_eq!(index.face_for_sticker("doc-15"), None);
    }
}
