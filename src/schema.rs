// psalm-pairs schema - ledger tables for Diesel ORM

diesel::table! {
    schema_migrations (id) {
        id -> Integer,
        version -> Integer,
        name -> Text,
        applied_at -> Text,
    }
}

diesel::table! {
    pair_arguments (id) {
        id -> Integer,
        psalm_x -> Integer,
        psalm_y -> Integer,
        prompt -> Text,
        response_text -> Text,
        response_json -> Text,       // Full structured response from the completion service
        model -> Text,
        created_at -> Text,
        // Token counts, NULL when the service did not report them
        total_tokens -> Nullable<BigInt>,
        reasoning_tokens -> Nullable<BigInt>,
        non_reasoning_tokens -> Nullable<BigInt>,
    }
}

diesel::table! {
    pair_evaluations (id) {
        id -> Integer,
        pair_id -> Integer,          // FK to pair_arguments.id
        score -> Double,
        justification -> Text,
        evaluator_model -> Text,
        evaluator_version -> Integer,
        evaluation_json -> Text,
        checks_json -> Nullable<Text>,
        flags_json -> Nullable<Text>,
        vocabulary_specificity -> Nullable<Double>,
        total_tokens -> Nullable<BigInt>,
        reasoning_tokens -> Nullable<BigInt>,
        non_reasoning_tokens -> Nullable<BigInt>,
        created_at -> Text,
    }
}

diesel::table! {
    pass_runs (id) {
        id -> Integer,
        run_id -> Text,              // UUID v4
        pass -> Text,                // 'generate' or 'evaluate'
        model -> Text,
        requested -> Integer,
        processed -> Integer,
        status -> Text,              // 'running', 'completed', 'failed'
        error -> Nullable<Text>,
        started_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::joinable!(pair_evaluations -> pair_arguments (pair_id));

diesel::allow_tables_to_appear_in_same_query!(
    schema_migrations,
    pair_arguments,
    pair_evaluations,
    pass_runs,
);
