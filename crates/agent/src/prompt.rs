//! Shopper prompt assembly. The prompt carries the goal, any remembered
//! default, and the ground rules; site knowledge stays limited to the search
//! URL template supplied by configuration.

use trolley_prefs::{NormalizedGoal, PreferenceRecord};

pub struct PromptContext<'a> {
    pub goal: &'a NormalizedGoal,
    pub preference: Option<&'a PreferenceRecord>,
    /// Original list text when the user replaced it mid-run.
    pub overridden_from: Option<&'a str>,
    pub choice_enabled: bool,
    pub search_url_template: &'a str,
}

pub fn build_shopper_prompt(ctx: &PromptContext<'_>) -> String {
    let goal = ctx.goal;
    let mut prompt = String::new();

    prompt.push_str(
        "You are a grocery shopping assistant driving a web browser on the \
         store's website. Work on exactly one shopping-list item.\n\n",
    );

    prompt.push_str(&format!(
        "Item to buy: {} (quantity: {})\n",
        goal.original_text, goal.quantity
    ));
    if let Some(brand) = &goal.brand {
        prompt.push_str(&format!("Required brand: {brand}\n"));
    }
    if let Some(unit) = &goal.unit_descriptor {
        prompt.push_str(&format!("Size or packaging: {unit}\n"));
    }
    let qualifiers: Vec<&str> = goal
        .qualifiers
        .iter()
        .map(String::as_str)
        .filter(|q| !q.trim().is_empty())
        .collect();
    if !qualifiers.is_empty() {
        prompt.push_str(&format!("Requirements: {}\n", qualifiers.join(", ")));
    }

    if let Some(record) = ctx.preference {
        prompt.push_str(&format!(
            "\nThe household's usual choice for {} is \"{}\". Buy that exact \
             product if it is available.\n",
            goal.category_label(),
            record.product_name
        ));
    }

    if let Some(previous) = ctx.overridden_from {
        prompt.push_str(&format!(
            "\nThe user replaced the earlier request \"{previous}\" with the \
             item above. Shop for the new request only.\n"
        ));
    }

    prompt.push_str("\nHow to work:\n");
    prompt.push_str(&format!(
        "1. Search for the item via {} (replace {{QUERY}} with the url-encoded \
         search terms).\n",
        ctx.search_url_template
    ));
    prompt.push_str("2. Compare the results against the requirements above.\n");
    if ctx.choice_enabled {
        prompt.push_str(
            "3. If several products fit and none is clearly right, call \
             request_product_choice with the best candidates and wait for the \
             answer.\n",
        );
    } else {
        prompt.push_str(
            "3. If several products fit, pick the closest match to the \
             requirements yourself.\n",
        );
    }
    prompt.push_str(&format!(
        "4. Add the chosen product to the cart with quantity {}.\n",
        goal.quantity
    ));
    prompt.push_str(
        "5. Call report_item_added with the exact product name and displayed \
         price once the cart updates.\n",
    );
    prompt.push_str(
        "6. If no suitable product exists, call report_item_not_found with a \
         short explanation instead.\n",
    );
    prompt.push_str(
        "\nNever open checkout, payment, or account pages, and never change \
         account settings. You are done only after one report call succeeds.\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use trolley_prefs::PreferenceMetadata;

    fn goal() -> NormalizedGoal {
        NormalizedGoal {
            original_text: "2x Lactantia 1% milk".to_string(),
            quantity: 2,
            quantity_string: Some("2x".to_string()),
            unit_descriptor: None,
            brand: Some("Lactantia".to_string()),
            category: "milk".to_string(),
            qualifiers: vec!["1%".to_string()],
        }
    }

    #[test]
    fn test_prompt_carries_goal_details() {
        let goal = goal();
        let prompt = build_shopper_prompt(&PromptContext {
            goal: &goal,
            preference: None,
            overridden_from: None,
            choice_enabled: true,
            search_url_template: "https://www.metro.ca/en/online-grocery/search?filter={QUERY}",
        });
        assert!(prompt.contains("quantity: 2"));
        assert!(prompt.contains("Required brand: Lactantia"));
        assert!(prompt.contains("1%"));
        assert!(prompt.contains("request_product_choice"));
        assert!(prompt.contains("search?filter={QUERY}"));
    }

    #[test]
    fn test_prompt_mentions_preference_and_override() {
        let goal = goal();
        let record = PreferenceRecord {
            product_name: "Lactantia PurFiltre 1% 2L".to_string(),
            metadata: PreferenceMetadata::default(),
        };
        let prompt = build_shopper_prompt(&PromptContext {
            goal: &goal,
            preference: Some(&record),
            overridden_from: Some("milk"),
            choice_enabled: false,
            search_url_template: "https://store.example/search?q={QUERY}",
        });
        assert!(prompt.contains("Lactantia PurFiltre 1% 2L"));
        assert!(prompt.contains("replaced the earlier request \"milk\""));
        assert!(!prompt.contains("request_product_choice"));
    }
}
