pub mod llm_enrichment_result;
