// SQLite schema. Timestamps are stored as RFC 3339 text.

diesel::table! {
    message_mappings (id) {
        id -> BigInt,
        instance_id -> BigInt,
        qq_room_id -> BigInt,
        qq_sender_id -> BigInt,
        seq -> BigInt,
        rand -> BigInt,
        tg_chat_id -> BigInt,
        tg_msg_id -> BigInt,
        brief -> Text,
        time -> BigInt,
        created_at -> Text,
    }
}
