diesel::table! {
    channels (id) {
        id -> BigInt,
        name -> Text,
        base_url -> Text,
        api_key -> Text,
        weight -> Integer,
        is_enabled -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    users (id) {
        id -> BigInt,
        api_key -> Text,
        name -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    models (id) {
        id -> BigInt,
        name -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    model_channels (id) {
        id -> BigInt,
        model_id -> BigInt,
        channel_id -> BigInt,
        backend_model_name -> Text,
        weight -> Integer,
        created_at -> BigInt,
    }
}

diesel::table! {
    sessions (id) {
        id -> BigInt,
        user_id -> BigInt,
        channel_id -> BigInt,
        last_used_at -> BigInt,
        created_at -> BigInt,
    }
}

diesel::table! {
    channel_metrics (channel_id) {
        channel_id -> BigInt,
        latency_avg -> Double,
        error_rate -> Double,
        request_count -> BigInt,
        success_count -> BigInt,
        last_updated_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    channels,
    users,
    models,
    model_channels,
    sessions,
    channel_metrics,
);
