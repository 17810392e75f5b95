//! Metadata fixtures shared by the query and unit-of-work test suites.
//!
//! The CMS model: users with phonenumbers (cascaded both ways), articles
//! (no cascade), a one-to-one address (inverse side on the user), and
//! groups through a join table. The forum model exercises owning to-one
//! dependencies (user -> avatar) for insert/delete ordering.

use crate::metadata::{
    CascadeFlags, EntityMetadataBuilder, JoinColumn, JoinTable, MetadataRegistry,
};

/// CMS entity model.
pub fn cms_registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();

    registry.register(
        EntityMetadataBuilder::new("CmsUser", "cms_users")
            .generated_id("id")
            .field("status")
            .field("username")
            .field("name")
            .one_to_many(
                "phonenumbers",
                "CmsPhonenumber",
                "user",
                CascadeFlags::save_and_delete(),
            )
            .one_to_many("articles", "CmsArticle", "user", CascadeFlags::default())
            .one_to_one_inverse("address", "CmsAddress", "user", CascadeFlags::save_only())
            .many_to_many_owning(
                "groups",
                "CmsGroup",
                JoinTable {
                    name: "cms_users_groups".to_string(),
                    join_columns: vec![JoinColumn::new("user_id", "id")],
                    inverse_join_columns: vec![JoinColumn::new("group_id", "id")],
                },
                CascadeFlags::save_only(),
            )
            .build(),
    );

    registry.register(
        EntityMetadataBuilder::new("CmsPhonenumber", "cms_phonenumbers")
            .assigned_id("phonenumber")
            .many_to_one("user", "CmsUser", vec![JoinColumn::new("user_id", "id")])
            .build(),
    );

    registry.register(
        EntityMetadataBuilder::new("CmsArticle", "cms_articles")
            .generated_id("id")
            .field("topic")
            .field("text")
            .many_to_one("user", "CmsUser", vec![JoinColumn::new("user_id", "id")])
            .build(),
    );

    registry.register(
        EntityMetadataBuilder::new("CmsAddress", "cms_addresses")
            .generated_id("id")
            .field("country")
            .field("zip")
            .field("city")
            .one_to_one_owning(
                "user",
                "CmsUser",
                vec![JoinColumn::new("user_id", "id")],
                CascadeFlags::default(),
            )
            .build(),
    );

    registry.register(
        EntityMetadataBuilder::new("CmsGroup", "cms_groups")
            .generated_id("id")
            .field("name")
            .many_to_many_inverse("users", "CmsUser", "groups")
            .build(),
    );

    registry
}

/// Forum entity model: `ForumUser.avatar` is an owning to-one, so avatars
/// must be inserted before their users and deleted after them.
pub fn forum_registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();

    registry.register(
        EntityMetadataBuilder::new("ForumUser", "forum_users")
            .generated_id("id")
            .field("username")
            .one_to_one_owning(
                "avatar",
                "ForumAvatar",
                vec![JoinColumn::new("avatar_id", "id")],
                CascadeFlags::save_only(),
            )
            .build(),
    );

    registry.register(
        EntityMetadataBuilder::new("ForumAvatar", "forum_avatars")
            .generated_id("id")
            .build(),
    );

    registry
}
